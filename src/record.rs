//! The normalized record shape shared by both replication readers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

/// Database/collection pair identifying where an event happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: Option<String>,
}

impl Namespace {
    fn to_value(&self) -> Value {
        serde_json::json!({
            "database": self.database,
            "collection": self.collection,
        })
    }
}

/// One extracted record before Singer message framing.
///
/// Incremental records carry `object_id`/`document`/`namespace` and leave the
/// change-stream fields null; log-based records mirror the change event. The
/// `sdc_*` timestamps are populated only when record metadata is enabled, and
/// `sdc_extracted_at` is consumed by the emitter as `time_extracted` rather
/// than serialized into the record body.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub replication_key: String,
    pub object_id: Option<String>,
    pub document: Option<Map<String, Value>>,
    pub update_description: Option<Value>,
    pub operation_type: Option<String>,
    pub cluster_time: Option<DateTime<Utc>>,
    pub namespace: Option<Namespace>,
    pub to: Option<Namespace>,
    pub sdc_extracted_at: Option<DateTime<Utc>>,
    pub sdc_batched_at: Option<DateTime<Utc>>,
    pub sdc_deleted_at: Option<DateTime<Utc>>,
}

impl ChangeRecord {
    /// A record carrying nothing but a replication key. Used to checkpoint an
    /// idle change stream's position.
    pub fn checkpoint_only(replication_key: String) -> Self {
        Self {
            replication_key,
            object_id: None,
            document: None,
            update_description: None,
            operation_type: None,
            cluster_time: None,
            namespace: None,
            to: None,
            sdc_extracted_at: None,
            sdc_batched_at: None,
            sdc_deleted_at: None,
        }
    }

    /// Render the record body. The eight protocol fields are always present
    /// (null when absent); `_sdc_*` fields appear only when set.
    pub fn into_map(self) -> Map<String, Value> {
        fn optional_string(value: Option<String>) -> Value {
            value.map(Value::String).unwrap_or(Value::Null)
        }
        fn optional_datetime(value: Option<DateTime<Utc>>, format: SecondsFormat) -> Value {
            value
                .map(|dt| Value::String(dt.to_rfc3339_opts(format, false)))
                .unwrap_or(Value::Null)
        }

        let mut map = Map::new();
        map.insert(
            "replication_key".to_string(),
            Value::String(self.replication_key),
        );
        map.insert("object_id".to_string(), optional_string(self.object_id));
        map.insert(
            "document".to_string(),
            self.document.map(Value::Object).unwrap_or(Value::Null),
        );
        map.insert(
            "update_description".to_string(),
            self.update_description.unwrap_or(Value::Null),
        );
        map.insert(
            "operation_type".to_string(),
            optional_string(self.operation_type),
        );
        map.insert(
            "cluster_time".to_string(),
            optional_datetime(self.cluster_time, SecondsFormat::Secs),
        );
        map.insert(
            "namespace".to_string(),
            self.namespace
                .map(|ns| ns.to_value())
                .unwrap_or(Value::Null),
        );
        map.insert(
            "to".to_string(),
            self.to.map(|ns| ns.to_value()).unwrap_or(Value::Null),
        );

        if let Some(at) = self.sdc_extracted_at {
            map.insert(
                "_sdc_extracted_at".to_string(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        if let Some(at) = self.sdc_batched_at {
            map.insert(
                "_sdc_batched_at".to_string(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        if let Some(at) = self.sdc_deleted_at {
            map.insert(
                "_sdc_deleted_at".to_string(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Micros, true)),
            );
        }
        map
    }
}
