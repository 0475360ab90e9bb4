//! Per-stream replication: method selection, bookmark advancement, and
//! record emission.

mod incremental;
mod log_based;

pub use incremental::IncrementalReader;
pub use log_based::LogBasedReader;

use crate::config::TapConfig;
use crate::connector::MongoConnector;
use crate::error::TapError;
use crate::record::ChangeRecord;
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use singer::{CatalogEntry, Message, MessageWriter, ReplicationMethod, State};

/// Name of the replication key property on every stream.
pub const REPLICATION_KEY: &str = "replication_key";

/// How many records to emit between STATE checkpoints within one stream.
const STATE_FLUSH_INTERVAL: u64 = 1000;

/// A pull-based producer of normalized records. Both replication readers
/// implement this; the stream drives whichever its catalog entry selects.
#[async_trait]
pub trait RecordSource {
    /// The next record, or `None` once the source is exhausted.
    async fn next_record(&mut self) -> anyhow::Result<Option<ChangeRecord>>;
}

/// Whether the stream's replication key values are alphanumerically sortable.
///
/// Incremental keys are time-prefixed strings and sort; log-based keys are
/// opaque resume token hex and are treated as unsorted for state purposes.
pub fn is_sorted(method: ReplicationMethod) -> bool {
    method == ReplicationMethod::Incremental
}

/// Primary key of the emitted records: the change event id in log-based
/// mode, the document id otherwise.
pub fn primary_keys(method: ReplicationMethod) -> Vec<String> {
    match method {
        ReplicationMethod::LogBased => vec![REPLICATION_KEY.to_string()],
        ReplicationMethod::Incremental => vec!["object_id".to_string()],
    }
}

/// One selected stream bound to its collection.
pub struct CollectionStream<'a> {
    connector: &'a MongoConnector,
    config: &'a TapConfig,
    entry: CatalogEntry,
}

impl<'a> CollectionStream<'a> {
    pub fn new(connector: &'a MongoConnector, config: &'a TapConfig, entry: CatalogEntry) -> Self {
        Self {
            connector,
            config,
            entry,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.entry.tap_stream_id
    }

    pub fn collection_name(&self) -> &str {
        &self.entry.table_name
    }

    /// The configured replication method; absent means the catalog was never
    /// edited to choose one, which is a configuration error.
    pub fn replication_method(&self) -> Result<ReplicationMethod, TapError> {
        self.entry.replication_method.ok_or_else(|| {
            TapError::InvalidConfig(format!(
                "stream '{}' has no replication_method; set INCREMENTAL or LOG_BASED in the catalog",
                self.entry.tap_stream_id
            ))
        })
    }

    fn schema_message(&self, method: ReplicationMethod) -> Message {
        Message::Schema {
            stream: self.entry.tap_stream_id.clone(),
            schema: self.entry.schema.clone(),
            key_properties: primary_keys(method),
            bookmark_properties: Some(vec![REPLICATION_KEY.to_string()]),
        }
    }

    /// Extract the stream: announce its schema, read records from the
    /// selected reader, and emit them with bookmark advancement. Returns the
    /// number of records emitted.
    pub async fn sync<W: MessageWriter>(
        &self,
        state: &mut State,
        writer: &mut W,
    ) -> anyhow::Result<u64> {
        let method = self.replication_method()?;
        writer.write_message(&self.schema_message(method))?;

        let bookmark = state.bookmark(self.stream_id()).map(str::to_string);
        tracing::info!(
            "starting {method:?} replication of stream '{}' (collection '{}')",
            self.stream_id(),
            self.collection_name()
        );

        match method {
            ReplicationMethod::Incremental => {
                let reader = IncrementalReader::open(
                    self.connector,
                    self.collection_name(),
                    bookmark.as_deref(),
                    self.config,
                )
                .await?;
                self.pump(method, reader, state, writer).await
            }
            ReplicationMethod::LogBased => {
                let reader = LogBasedReader::open(
                    self.connector,
                    self.collection_name(),
                    bookmark.as_deref(),
                    self.config,
                )
                .await?;
                self.pump(method, reader, state, writer).await
            }
        }
    }

    async fn pump<R: RecordSource, W: MessageWriter>(
        &self,
        method: ReplicationMethod,
        mut reader: R,
        state: &mut State,
        writer: &mut W,
    ) -> anyhow::Result<u64> {
        let mut emitted = 0u64;
        loop {
            let record = reader.next_record().await.with_context(|| {
                format!(
                    "stream '{}' (collection '{}')",
                    self.stream_id(),
                    self.collection_name()
                )
            })?;
            let Some(record) = record else {
                break;
            };
            emit_record(&self.entry, treat_as_sorted(&self.entry, method), record, state, writer)?;
            emitted += 1;
            if emitted % STATE_FLUSH_INTERVAL == 0 {
                writer.write_message(&Message::State {
                    value: state.to_value(),
                })?;
            }
        }
        tracing::info!(
            "completed stream '{}': {emitted} records",
            self.stream_id()
        );
        Ok(emitted)
    }
}

/// Sortedness actually used for bookmark advancement: streams with custom
/// state partitioning are never treated as sorted.
fn treat_as_sorted(entry: &CatalogEntry, method: ReplicationMethod) -> bool {
    is_sorted(method) && entry.state_partitioning_keys.is_none()
}

/// Emit one record and advance the stream's bookmark.
///
/// `time_extracted` comes from the record's private extraction timestamp when
/// the reader set one (log-based readers use the event's cluster time) and
/// from the wall clock otherwise. The extraction timestamp itself is not
/// serialized into the record body. Properties deselected in the catalog are
/// dropped before framing.
fn emit_record<W: MessageWriter>(
    entry: &CatalogEntry,
    treat_as_sorted: bool,
    record: ChangeRecord,
    state: &mut State,
    writer: &mut W,
) -> anyhow::Result<()> {
    let replication_key = record.replication_key.clone();
    let time_extracted = record.sdc_extracted_at.unwrap_or_else(Utc::now);

    let mut body = record.into_map();
    body.remove("_sdc_extracted_at");
    body.retain(|property, _| entry.property_selected(property));

    writer.write_message(&Message::record(
        entry.tap_stream_id.clone(),
        Value::Object(body),
        time_extracted,
    ))?;
    state.advance(
        &entry.tap_stream_id,
        REPLICATION_KEY,
        &replication_key,
        treat_as_sorted,
        true,
    )?;
    Ok(())
}
