//! Log-based replication over change streams.
//!
//! Opens a change stream scoped to one collection and emits one normalized
//! record per allowlisted event. The reader owns the recoverable conditions:
//! resume-token invalidation (code 286) reopens the stream from the current
//! position, and disabled change streams on DocumentDB (code 136) are
//! enabled through the admin command when the operator opted in.
//!
//! Idle behavior differs between engines. MongoDB surfaces a resume token
//! immediately on an idle stream, so the reader emits a single
//! checkpoint-only record carrying that token and exits rather than blocking
//! on a quiet collection. DocumentDB keeps the token null until an event
//! arrives, so the reader stays polling until one does.

use crate::config::{DateTimeConversion, TapConfig, DEFAULT_START_DATE};
use crate::connector::MongoConnector;
use crate::error::TapError;
use crate::record::{ChangeRecord, Namespace};
use crate::resume::{select_resume_strategy, ResumeStrategy};
use crate::sanitize::sanitize_document;
use anyhow::Context;
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::Collection;
use serde_json::{Map, Value};
use std::collections::HashSet;

const CODE_CHANGE_STREAMS_DISABLED: i32 = 136;
const CODE_RESUME_POINT_LOST: i32 = 286;

type EventStream = ChangeStream<ChangeStreamEvent<Document>>;

/// Consumes a collection's change stream from a resume-token bookmark.
pub struct LogBasedReader {
    collection: Collection<Document>,
    stream: EventStream,
    database: String,
    collection_name: String,
    allowlist: HashSet<String>,
    datetime_conversion: DateTimeConversion,
    add_metadata: bool,
    has_seen_a_record: bool,
    keep_open: bool,
}

impl LogBasedReader {
    pub async fn open(
        connector: &MongoConnector,
        collection_name: &str,
        bookmark: Option<&str>,
        config: &TapConfig,
    ) -> anyhow::Result<Self> {
        let version = connector.version().await?;
        let strategy = select_resume_strategy(version, &config.change_stream_resume_strategy)?;

        let mut options = base_options();
        if let Some(raw) = bookmark {
            if raw != DEFAULT_START_DATE {
                let token = token_from_hex(raw).with_context(|| {
                    format!("bookmark of collection '{collection_name}' is not a resume token")
                })?;
                match strategy {
                    ResumeStrategy::StartAfter => {
                        tracing::debug!("resuming {collection_name} with start_after: {raw}");
                        options.start_after = Some(token);
                    }
                    // A stored bookmark is an opaque token, not an operation
                    // time, so the remaining strategies resume by token.
                    ResumeStrategy::ResumeAfter | ResumeStrategy::StartAtOperationTime => {
                        tracing::debug!("resuming {collection_name} with resume_after: {raw}");
                        options.resume_after = Some(token);
                    }
                }
            }
        }

        let collection = connector.collection(collection_name);
        let stream = open_stream(
            connector,
            &collection,
            options,
            config.allow_modify_change_streams,
        )
        .await?;

        Ok(Self {
            collection,
            stream,
            database: connector.database_name().to_string(),
            collection_name: collection_name.to_string(),
            allowlist: config.operation_types.iter().cloned().collect(),
            datetime_conversion: config.datetime_conversion,
            add_metadata: config.add_record_metadata,
            has_seen_a_record: false,
            keep_open: true,
        })
    }

    async fn reopen_from_now(&mut self) -> anyhow::Result<()> {
        tracing::warn!(
            "resume point for {}.{} is no longer in the oplog; reopening from the current position",
            self.database,
            self.collection_name
        );
        self.stream = self
            .collection
            .watch()
            .with_options(base_options())
            .await
            .with_context(|| {
                format!(
                    "reopening change stream on collection '{}'",
                    self.collection_name
                )
            })?;
        Ok(())
    }
}

#[async_trait]
impl super::RecordSource for LogBasedReader {
    async fn next_record(&mut self) -> anyhow::Result<Option<ChangeRecord>> {
        loop {
            if !self.keep_open {
                return Ok(None);
            }

            let event = match self.stream.next_if_any().await {
                Ok(event) => event,
                Err(err) if command_error_code(&err) == Some(CODE_RESUME_POINT_LOST) => {
                    self.reopen_from_now().await?;
                    continue;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!(
                            "change stream failure on {}.{}",
                            self.database, self.collection_name
                        )
                    });
                }
            };

            match event {
                Some(event) => {
                    let operation_type = operation_type_name(&event.operation_type);
                    if !self.allowlist.contains(&operation_type) {
                        tracing::debug!(
                            "skipping {operation_type} event on {}.{}",
                            self.database,
                            self.collection_name
                        );
                        continue;
                    }
                    let record =
                        event_record(event, self.datetime_conversion, self.add_metadata)?;
                    self.has_seen_a_record = true;
                    return Ok(Some(record));
                }
                None if self.has_seen_a_record => {
                    // Caught up with the oplog.
                    self.keep_open = false;
                    return Ok(None);
                }
                None => match self.stream.resume_token() {
                    Some(token) => {
                        // Idle MongoDB stream: checkpoint the current token
                        // and exit instead of waiting for activity. The next
                        // run resumes exactly here.
                        self.has_seen_a_record = true;
                        self.keep_open = false;
                        let replication_key = token_data_hex(&token)?;
                        tracing::debug!(
                            "no activity on {}.{}; emitting checkpoint record for token {replication_key}",
                            self.database,
                            self.collection_name
                        );
                        return Ok(Some(ChangeRecord::checkpoint_only(replication_key)));
                    }
                    // Idle DocumentDB stream: no token until an event
                    // arrives, so hold the stream open.
                    None => continue,
                },
            }
        }
    }
}

fn base_options() -> ChangeStreamOptions {
    ChangeStreamOptions::builder()
        .full_document(Some(FullDocumentType::UpdateLookup))
        .build()
}

/// Open the change stream, handling the two recoverable open failures.
async fn open_stream(
    connector: &MongoConnector,
    collection: &Collection<Document>,
    options: ChangeStreamOptions,
    allow_modify_change_streams: bool,
) -> anyhow::Result<EventStream> {
    let collection_name = collection.name().to_string();
    match collection.watch().with_options(options.clone()).await {
        Ok(stream) => Ok(stream),
        Err(err) => match command_error_code(&err) {
            Some(CODE_CHANGE_STREAMS_DISABLED) if allow_modify_change_streams => {
                enable_change_streams(connector, &collection_name).await?;
                Ok(collection.watch().with_options(options).await.with_context(
                    || format!("opening change stream on collection '{collection_name}'"),
                )?)
            }
            Some(CODE_CHANGE_STREAMS_DISABLED) => Err(TapError::ChangeStreamsDisabled {
                collection: collection_name,
            }
            .into()),
            Some(CODE_RESUME_POINT_LOST) => {
                tracing::warn!(
                    "unable to resume change stream on collection '{collection_name}' from the \
                     stored token; reopening from the current position"
                );
                Ok(collection
                    .watch()
                    .with_options(base_options())
                    .await
                    .with_context(|| {
                        format!("opening change stream on collection '{collection_name}'")
                    })?)
            }
            _ => Err(err).with_context(|| {
                format!("opening change stream on collection '{collection_name}'")
            }),
        },
    }
}

/// Run `modifyChangeStreams` to enable the stream on a DocumentDB collection.
async fn enable_change_streams(
    connector: &MongoConnector,
    collection_name: &str,
) -> Result<(), TapError> {
    tracing::info!(
        "enabling change streams on {}.{collection_name}",
        connector.database_name()
    );
    let reply = connector
        .admin_command(doc! {
            "modifyChangeStreams": 1,
            "database": connector.database_name(),
            "collection": collection_name,
            "enable": true,
        })
        .await
        .map_err(|err| {
            tracing::error!("modifyChangeStreams failed on collection '{collection_name}': {err}");
            TapError::CannotEnableChangeStream {
                collection: collection_name.to_string(),
            }
        })?;
    if !command_ok(&reply) {
        return Err(TapError::CannotEnableChangeStream {
            collection: collection_name.to_string(),
        });
    }
    Ok(())
}

/// The server error code of a command failure, if that is what `err` is.
fn command_error_code(err: &mongodb::error::Error) -> Option<i32> {
    match *err.kind {
        mongodb::error::ErrorKind::Command(ref command_error) => Some(command_error.code),
        _ => None,
    }
}

fn command_ok(reply: &Document) -> bool {
    matches!(
        reply.get("ok"),
        Some(Bson::Double(v)) if *v == 1.0
    ) || matches!(reply.get("ok"), Some(Bson::Int32(1)) | Some(Bson::Int64(1)))
}

/// Rebuild a driver resume token from its persisted `_data` hex string.
fn token_from_hex(bookmark: &str) -> anyhow::Result<ResumeToken> {
    Ok(bson::from_bson(Bson::Document(doc! {"_data": bookmark}))?)
}

/// The `_data` hex string inside a resume token.
pub(crate) fn token_data_hex(token: &ResumeToken) -> anyhow::Result<String> {
    let raw = bson::to_bson(token)?;
    let document = raw
        .as_document()
        .ok_or_else(|| anyhow::anyhow!("resume token is not a document"))?;
    Ok(document
        .get_str("_data")
        .map_err(|_| anyhow::anyhow!("resume token carries no _data string"))?
        .to_string())
}

fn operation_type_name(operation_type: &OperationType) -> String {
    match operation_type {
        OperationType::Insert => "insert".to_string(),
        OperationType::Update => "update".to_string(),
        OperationType::Replace => "replace".to_string(),
        OperationType::Delete => "delete".to_string(),
        OperationType::Drop => "drop".to_string(),
        OperationType::Rename => "rename".to_string(),
        OperationType::DropDatabase => "dropDatabase".to_string(),
        OperationType::Invalidate => "invalidate".to_string(),
        OperationType::Other(name) => name.clone(),
        other => format!("{other:?}"),
    }
}

/// Normalize one change event.
pub(crate) fn event_record(
    event: ChangeStreamEvent<Document>,
    datetime_conversion: DateTimeConversion,
    add_metadata: bool,
) -> anyhow::Result<ChangeRecord> {
    let operation_type = operation_type_name(&event.operation_type);
    let replication_key = token_data_hex(&event.id)?;
    let cluster_time = event
        .cluster_time
        .and_then(|ts| DateTime::from_timestamp(ts.time as i64, 0));

    // Delete events omit fullDocument; fall back to the document key so the
    // record still names the deleted id.
    let document = event
        .full_document
        .or(event.document_key)
        .map(|d| sanitize_document(&d, datetime_conversion));
    let object_id = document.as_ref().and_then(|d| d.get("_id")).map(|id| match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let update_description = event
        .update_description
        .map(|ud| update_description_value(ud, datetime_conversion));
    let namespace = event.ns.map(|ns| Namespace {
        database: ns.db,
        collection: ns.coll,
    });
    let to = event.to.map(|ns| Namespace {
        database: ns.db,
        collection: ns.coll,
    });

    let is_delete = operation_type == "delete";
    Ok(ChangeRecord {
        replication_key,
        object_id,
        document,
        update_description,
        operation_type: Some(operation_type),
        cluster_time,
        namespace,
        to,
        sdc_extracted_at: if add_metadata { cluster_time } else { None },
        sdc_batched_at: add_metadata.then(Utc::now),
        sdc_deleted_at: if add_metadata && is_delete {
            cluster_time
        } else {
            None
        },
    })
}

fn update_description_value(
    update_description: mongodb::change_stream::event::UpdateDescription,
    datetime_conversion: DateTimeConversion,
) -> Value {
    let mut map = Map::new();
    map.insert(
        "updatedFields".to_string(),
        Value::Object(sanitize_document(
            &update_description.updated_fields,
            datetime_conversion,
        )),
    );
    map.insert(
        "removedFields".to_string(),
        serde_json::json!(update_description.removed_fields),
    );
    if let Some(truncated) = update_description.truncated_arrays {
        map.insert(
            "truncatedArrays".to_string(),
            Value::Array(
                truncated
                    .iter()
                    .map(|t| serde_json::json!({"field": t.field, "newSize": t.new_size}))
                    .collect(),
            ),
        );
    }
    Value::Object(map)
}
