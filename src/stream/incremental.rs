//! Incremental replication: ordered collection scans from a bookmark.

use crate::config::{DateTimeConversion, TapConfig};
use crate::connector::MongoConnector;
use crate::error::TapError;
use crate::record::{ChangeRecord, Namespace};
use crate::sanitize::sanitize_document;
use crate::types::{to_object_id, IncrementalId};
use anyhow::Context;
use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Document};
use chrono::Utc;
use mongodb::Cursor;

use super::RecordSource;

/// Scans a collection in ascending `_id` order from an exclusive lower bound.
///
/// Every emitted record's replication key is the fused generation-time/id
/// string, so the bookmark after record N reopens the scan exactly at N+1.
pub struct IncrementalReader {
    cursor: Cursor<Document>,
    database: String,
    collection: String,
    datetime_conversion: DateTimeConversion,
    add_metadata: bool,
}

impl IncrementalReader {
    pub async fn open(
        connector: &MongoConnector,
        collection_name: &str,
        bookmark: Option<&str>,
        config: &TapConfig,
    ) -> anyhow::Result<Self> {
        let lower = lower_bound(bookmark, &config.start_date)?;
        tracing::debug!(
            "scanning {}.{collection_name} for _id > {lower}",
            connector.database_name()
        );

        let cursor = connector
            .collection(collection_name)
            .find(doc! {"_id": {"$gt": lower}})
            .sort(doc! {"_id": 1})
            .await
            .with_context(|| format!("opening find cursor on collection '{collection_name}'"))?;

        Ok(Self {
            cursor,
            database: connector.database_name().to_string(),
            collection: collection_name.to_string(),
            datetime_conversion: config.datetime_conversion,
            add_metadata: config.add_record_metadata,
        })
    }
}

#[async_trait]
impl RecordSource for IncrementalReader {
    async fn next_record(&mut self) -> anyhow::Result<Option<ChangeRecord>> {
        if !self.cursor.advance().await? {
            return Ok(None);
        }
        let document: Document = self.cursor.current().try_into()?;
        let record = document_record(
            document,
            &self.database,
            &self.collection,
            self.datetime_conversion,
            self.add_metadata,
        )?;
        Ok(Some(record))
    }
}

/// The ObjectId to scan from: the parsed bookmark when one exists and parses,
/// otherwise the configured start date. A malformed bookmark falls back with
/// a warning instead of failing the stream.
fn lower_bound(bookmark: Option<&str>, start_date: &str) -> Result<ObjectId, TapError> {
    if let Some(raw) = bookmark {
        match to_object_id(raw) {
            Ok(object_id) => {
                tracing::debug!("using existing bookmark: {raw}");
                return Ok(object_id);
            }
            Err(err) => {
                tracing::warn!(
                    "ignoring malformed bookmark '{raw}' ({err}); falling back to start date {start_date}"
                );
            }
        }
    }
    tracing::debug!("no bookmark - using start date: {start_date}");
    to_object_id(start_date)
}

/// Normalize one scanned document.
pub(crate) fn document_record(
    document: Document,
    database: &str,
    collection: &str,
    datetime_conversion: DateTimeConversion,
    add_metadata: bool,
) -> anyhow::Result<ChangeRecord> {
    let object_id = document.get_object_id("_id").map_err(|_| {
        anyhow::anyhow!(
            "collection '{collection}' document has a non-ObjectId _id ({:?}); \
             incremental replication requires ObjectId keys",
            document.get("_id")
        )
    })?;
    let incremental_id = IncrementalId::from_object_id(&object_id);

    Ok(ChangeRecord {
        replication_key: incremental_id.to_string(),
        object_id: Some(object_id.to_hex()),
        document: Some(sanitize_document(&document, datetime_conversion)),
        update_description: None,
        operation_type: None,
        cluster_time: None,
        namespace: Some(Namespace {
            database: database.to_string(),
            collection: Some(collection.to_string()),
        }),
        to: None,
        sdc_extracted_at: None,
        sdc_batched_at: add_metadata.then(Utc::now),
        sdc_deleted_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lower_bound_defaults_to_epoch() {
        let lower = lower_bound(None, "1970-01-01").unwrap();
        assert_eq!(
            lower,
            ObjectId::parse_str("000000000000000000000000").unwrap()
        );
    }

    #[test]
    fn test_lower_bound_uses_bookmark() {
        let lower = lower_bound(
            Some("2021-09-22T01:02:48+00:00|614a80b81ad8c60001b7d5f3"),
            "1970-01-01",
        )
        .unwrap();
        assert_eq!(
            lower,
            ObjectId::parse_str("614a80b81ad8c60001b7d5f3").unwrap()
        );
    }

    #[test]
    fn test_lower_bound_falls_back_on_malformed_bookmark() {
        let lower = lower_bound(Some("not-a-bookmark"), "2021-09-22").unwrap();
        assert_eq!(
            lower,
            ObjectId::parse_str("614a72000000000000000000").unwrap()
        );
    }

    #[test]
    fn test_document_record_shape() {
        let oid = ObjectId::parse_str("614a80b81ad8c60001b7d5f3").unwrap();
        let record = document_record(
            doc! {"_id": oid, "total": 12.5},
            "orders",
            "items",
            DateTimeConversion::Datetime,
            false,
        )
        .unwrap();

        assert_eq!(
            record.replication_key,
            "2021-09-22T01:02:48+00:00|614a80b81ad8c60001b7d5f3"
        );
        assert_eq!(
            record.object_id.as_deref(),
            Some("614a80b81ad8c60001b7d5f3")
        );
        let document = record.document.unwrap();
        assert_eq!(document["_id"], json!("614a80b81ad8c60001b7d5f3"));
        assert_eq!(document["total"], json!(12.5));
        assert_eq!(record.operation_type, None);
        assert_eq!(record.cluster_time, None);
        assert_eq!(record.update_description, None);
        assert_eq!(record.to, None);
        let namespace = record.namespace.unwrap();
        assert_eq!(namespace.database, "orders");
        assert_eq!(namespace.collection.as_deref(), Some("items"));
        assert_eq!(record.sdc_batched_at, None);
    }

    #[test]
    fn test_document_record_metadata_stamping() {
        let record = document_record(
            doc! {"_id": ObjectId::new()},
            "orders",
            "items",
            DateTimeConversion::Datetime,
            true,
        )
        .unwrap();
        assert!(record.sdc_batched_at.is_some());
        assert!(record.sdc_extracted_at.is_none());
        assert!(record.sdc_deleted_at.is_none());
    }

    #[test]
    fn test_document_record_rejects_non_object_id_keys() {
        let err = document_record(
            doc! {"_id": "string-key"},
            "orders",
            "items",
            DateTimeConversion::Datetime,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-ObjectId"));
    }
}
