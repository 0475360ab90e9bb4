//! Catalog model: streams, replication settings, and selection metadata.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Replication method of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMethod {
    /// Ordered scan by document id, resumable via the fused replication key.
    #[serde(rename = "INCREMENTAL")]
    Incremental,
    /// Change stream consumption, resumable via engine resume tokens.
    #[serde(rename = "LOG_BASED")]
    LogBased,
}

/// One `metadata` entry: a breadcrumb addressing the stream (`[]`) or a
/// property (`["properties", <name>]`) plus a free-form metadata object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub breadcrumb: Vec<String>,
    pub metadata: Value,
}

/// A catalog document: the list of discovered or user-edited streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse a catalog document from its JSON form.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// A single stream in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Unique stream identifier (lowercased, prefixed, collection-derived).
    pub tap_stream_id: String,
    /// Display name; defaults to the stream id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Source collection name.
    pub table_name: String,
    /// Output JSON schema of the stream.
    pub schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<ReplicationMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    #[serde(default)]
    pub key_properties: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    /// Custom state partitioning keys. Streams carrying these are treated as
    /// unsorted for bookmark purposes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_partitioning_keys: Option<Vec<String>>,
}

impl CatalogEntry {
    /// Whether the stream is selected for extraction.
    ///
    /// A stream with no stream-level metadata entry is considered selected so
    /// hand-written catalogs do not need to spell out selection.
    pub fn selected(&self) -> bool {
        match self.stream_metadata() {
            Some(metadata) => {
                metadata["selected"].as_bool().unwrap_or(false)
                    || metadata["inclusion"] == "automatic"
            }
            None => true,
        }
    }

    /// Whether a record property survives the selection mask.
    ///
    /// Properties are included unless explicitly deselected; properties with
    /// `inclusion: automatic` cannot be deselected.
    pub fn property_selected(&self, name: &str) -> bool {
        let Some(metadata) = self.property_metadata(name) else {
            return true;
        };
        if metadata["inclusion"] == "automatic" {
            return true;
        }
        metadata["selected"].as_bool().unwrap_or(true)
    }

    fn stream_metadata(&self) -> Option<&Value> {
        self.metadata
            .iter()
            .find(|entry| entry.breadcrumb.is_empty())
            .map(|entry| &entry.metadata)
    }

    fn property_metadata(&self, name: &str) -> Option<&Value> {
        self.metadata
            .iter()
            .find(|entry| {
                entry.breadcrumb.len() == 2
                    && entry.breadcrumb[0] == "properties"
                    && entry.breadcrumb[1] == name
            })
            .map(|entry| &entry.metadata)
    }

    /// Standard metadata for a discovered stream: a stream-level entry with
    /// table name and key properties, plus one `available` entry per schema
    /// property.
    pub fn standard_metadata(
        schema: &Value,
        table_name: &str,
        key_properties: &[String],
    ) -> Vec<MetadataEntry> {
        let mut entries = vec![MetadataEntry {
            breadcrumb: Vec::new(),
            metadata: serde_json::json!({
                "inclusion": "available",
                "table-key-properties": key_properties,
                "database-name": table_name,
            }),
        }];
        if let Some(properties) = schema["properties"].as_object() {
            for name in properties.keys() {
                let inclusion = if key_properties.iter().any(|k| k == name) {
                    "automatic"
                } else {
                    "available"
                };
                entries.push(MetadataEntry {
                    breadcrumb: vec!["properties".to_string(), name.clone()],
                    metadata: serde_json::json!({ "inclusion": inclusion }),
                });
            }
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_with_metadata(metadata: Vec<MetadataEntry>) -> CatalogEntry {
        CatalogEntry {
            tap_stream_id: "mydb_users".to_string(),
            stream: None,
            table_name: "users".to_string(),
            schema: json!({"type": "object", "properties": {"document": {}}}),
            replication_method: Some(ReplicationMethod::Incremental),
            replication_key: Some("replication_key".to_string()),
            key_properties: vec!["object_id".to_string()],
            metadata,
            state_partitioning_keys: None,
        }
    }

    #[test]
    fn test_replication_method_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReplicationMethod::Incremental).unwrap(),
            "\"INCREMENTAL\""
        );
        assert_eq!(
            serde_json::to_string(&ReplicationMethod::LogBased).unwrap(),
            "\"LOG_BASED\""
        );
    }

    #[test]
    fn test_stream_selected_by_default() {
        assert!(entry_with_metadata(Vec::new()).selected());
    }

    #[test]
    fn test_stream_deselected_explicitly() {
        let entry = entry_with_metadata(vec![MetadataEntry {
            breadcrumb: Vec::new(),
            metadata: json!({"selected": false}),
        }]);
        assert!(!entry.selected());
    }

    #[test]
    fn test_property_deselection() {
        let entry = entry_with_metadata(vec![
            MetadataEntry {
                breadcrumb: vec!["properties".to_string(), "document".to_string()],
                metadata: json!({"selected": false}),
            },
            MetadataEntry {
                breadcrumb: vec!["properties".to_string(), "replication_key".to_string()],
                metadata: json!({"inclusion": "automatic", "selected": false}),
            },
        ]);
        assert!(!entry.property_selected("document"));
        // Automatic properties cannot be deselected.
        assert!(entry.property_selected("replication_key"));
        // Unmentioned properties default to selected.
        assert!(entry.property_selected("operation_type"));
    }

    #[test]
    fn test_catalog_roundtrip() {
        let entry = entry_with_metadata(Vec::new());
        let catalog = Catalog {
            streams: vec![entry],
        };
        let raw = serde_json::to_string(&catalog).unwrap();
        let parsed = Catalog::from_json(&raw).unwrap();
        assert_eq!(parsed, catalog);
    }

    #[test]
    fn test_standard_metadata_marks_keys_automatic() {
        let schema = json!({"properties": {"object_id": {}, "document": {}}});
        let entries = CatalogEntry::standard_metadata(
            &schema,
            "users",
            &["object_id".to_string()],
        );
        let object_id = entries
            .iter()
            .find(|e| e.breadcrumb == vec!["properties", "object_id"])
            .unwrap();
        assert_eq!(object_id.metadata["inclusion"], "automatic");
        let document = entries
            .iter()
            .find(|e| e.breadcrumb == vec!["properties", "document"])
            .unwrap();
        assert_eq!(document.metadata["inclusion"], "available");
    }
}
