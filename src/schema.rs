//! The fixed output schema declared for every stream.
//!
//! Document shape is not inferred; every stream shares this envelope and the
//! source document travels in the `document` property.

use serde_json::{json, Value};

/// JSON schema of the normalized record envelope.
pub fn stream_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "replication_key": {
                "description": "Fused generation-time/document-id key in incremental mode; change event resume token in log-based mode",
                "type": ["string"],
            },
            "object_id": {
                "description": "The document's _id",
                "type": ["string", "null"],
            },
            "document": {
                "description": "The document from the collection",
                "additionalProperties": true,
                "type": ["object", "null"],
            },
            "update_description": {
                "additionalProperties": true,
                "type": ["object", "null"],
            },
            "operation_type": {
                "type": ["string", "null"],
            },
            "cluster_time": {
                "format": "date-time",
                "type": ["string", "null"],
            },
            "namespace": {
                "additionalProperties": true,
                "type": ["object", "null"],
            },
            "to": {
                "additionalProperties": true,
                "type": ["object", "null"],
            },
            "_sdc_extracted_at": {
                "format": "date-time",
                "type": ["string", "null"],
            },
            "_sdc_batched_at": {
                "format": "date-time",
                "type": ["string", "null"],
            },
            "_sdc_deleted_at": {
                "format": "date-time",
                "type": ["string", "null"],
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_covers_record_envelope() {
        let schema = stream_schema();
        let properties = schema["properties"].as_object().unwrap();
        for field in [
            "replication_key",
            "object_id",
            "document",
            "update_description",
            "operation_type",
            "cluster_time",
            "namespace",
            "to",
            "_sdc_extracted_at",
            "_sdc_batched_at",
            "_sdc_deleted_at",
        ] {
            assert!(properties.contains_key(field), "schema missing {field}");
        }
    }
}
