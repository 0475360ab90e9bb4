//! Recursive conversion of BSON values into JSON-safe record values.
//!
//! Everything a change event or collection scan can carry must survive
//! `serde_json` serialization: engine-only types are rewritten to stable
//! string forms and non-finite doubles become null. The conversion produces a
//! fresh tree and never mutates the source document.

use crate::config::DateTimeConversion;
use base64::{engine::general_purpose, Engine as _};
use bson::spec::BinarySubtype;
use bson::{Bson, Document};
use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Map, Value};

/// Convert a whole document, preserving key order.
pub fn sanitize_document(document: &Document, conversion: DateTimeConversion) -> Map<String, Value> {
    document
        .iter()
        .map(|(key, value)| (key.clone(), sanitize_bson(value, conversion)))
        .collect()
}

/// Convert one BSON value.
pub fn sanitize_bson(value: &Bson, conversion: DateTimeConversion) -> Value {
    match value {
        Bson::Double(f) if !f.is_finite() => Value::Null,
        Bson::Double(f) => json!(f),
        Bson::String(s) => Value::String(s.clone()),
        Bson::Boolean(b) => Value::Bool(*b),
        Bson::Int32(i) => json!(i),
        Bson::Int64(i) => json!(i),
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(dt) => match conversion {
            DateTimeConversion::DatetimeMs => json!(dt.timestamp_millis()),
            _ => Value::String(
                dt.to_chrono()
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        },
        Bson::Timestamp(ts) => {
            // The increment component doubles as sub-second precision so
            // timestamps from the same second keep their relative order.
            let rendered = DateTime::from_timestamp(ts.time as i64, ts.increment)
                .or_else(|| DateTime::from_timestamp(ts.time as i64, 0));
            match rendered {
                Some(dt) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                None => Value::Null,
            }
        }
        Bson::Binary(binary) => match binary.subtype {
            BinarySubtype::Uuid | BinarySubtype::UuidOld => {
                match uuid::Uuid::from_slice(&binary.bytes) {
                    Ok(id) => Value::String(id.to_string()),
                    Err(_) => Value::String(general_purpose::STANDARD.encode(&binary.bytes)),
                }
            }
            _ => Value::String(general_purpose::STANDARD.encode(&binary.bytes)),
        },
        Bson::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_bson(item, conversion))
                .collect(),
        ),
        Bson::Document(doc) => Value::Object(sanitize_document(doc, conversion)),
        Bson::RegularExpression(regex) => {
            Value::String(format!("(?{}){}", regex.options, regex.pattern))
        }
        Bson::JavaScriptCode(code) => Value::String(code.clone()),
        Bson::JavaScriptCodeWithScope(code_with_scope) => json!({
            "$code": code_with_scope.code,
            "$scope": Value::Object(sanitize_document(&code_with_scope.scope, conversion)),
        }),
        Bson::Symbol(s) => Value::String(s.clone()),
        Bson::Decimal128(decimal) => Value::String(decimal.to_string()),
        Bson::MinKey => json!({"$minKey": 1}),
        Bson::MaxKey => json!({"$maxKey": 1}),
        Bson::DbPointer(_) => Value::String("$dbPointer".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::{doc, Binary};

    fn sanitize(document: &Document) -> Map<String, Value> {
        sanitize_document(document, DateTimeConversion::Datetime)
    }

    #[test]
    fn test_object_id_becomes_hex() {
        let oid = ObjectId::parse_str("614a80b81ad8c60001b7d5f3").unwrap();
        let out = sanitize(&doc! {"_id": oid});
        assert_eq!(out["_id"], json!("614a80b81ad8c60001b7d5f3"));
    }

    #[test]
    fn test_datetime_rendering_modes() {
        let dt = bson::DateTime::from_millis(1_632_272_568_123);
        let doc = doc! {"at": dt};
        let iso = sanitize_document(&doc, DateTimeConversion::Datetime);
        assert_eq!(iso["at"], json!("2021-09-22T01:02:48.123Z"));
        let millis = sanitize_document(&doc, DateTimeConversion::DatetimeMs);
        assert_eq!(millis["at"], json!(1_632_272_568_123i64));
    }

    #[test]
    fn test_non_finite_doubles_become_null() {
        let out = sanitize(&doc! {
            "inf": f64::INFINITY,
            "ninf": f64::NEG_INFINITY,
            "nan": f64::NAN,
            "pi": 3.25,
        });
        assert_eq!(out["inf"], Value::Null);
        assert_eq!(out["ninf"], Value::Null);
        assert_eq!(out["nan"], Value::Null);
        assert_eq!(out["pi"], json!(3.25));
    }

    #[test]
    fn test_non_finite_inside_nested_structures() {
        let out = sanitize(&doc! {
            "nested": {"values": [1.5, f64::NAN, {"deep": f64::INFINITY}]},
        });
        assert_eq!(
            out["nested"],
            json!({"values": [1.5, null, {"deep": null}]})
        );
    }

    #[test]
    fn test_binary_becomes_base64_and_uuid_becomes_canonical() {
        let uuid_bytes = uuid::Uuid::parse_str("3f2b8c1e-9a4d-4e21-8a52-19e3f0a2b4c6")
            .unwrap()
            .into_bytes()
            .to_vec();
        let out = sanitize(&doc! {
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3, 4] },
            "uuid": Binary { subtype: BinarySubtype::Uuid, bytes: uuid_bytes },
        });
        assert_eq!(out["payload"], json!("AQIDBA=="));
        assert_eq!(out["uuid"], json!("3f2b8c1e-9a4d-4e21-8a52-19e3f0a2b4c6"));
    }

    #[test]
    fn test_scalars_pass_through() {
        let out = sanitize(&doc! {
            "s": "text",
            "b": true,
            "i32": 7i32,
            "i64": 7_000_000_000i64,
            "null": Bson::Null,
        });
        assert_eq!(out["s"], json!("text"));
        assert_eq!(out["b"], json!(true));
        assert_eq!(out["i32"], json!(7));
        assert_eq!(out["i64"], json!(7_000_000_000i64));
        assert_eq!(out["null"], Value::Null);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let oid = ObjectId::parse_str("614a80b81ad8c60001b7d5f3").unwrap();
        let source = doc! {
            "_id": oid,
            "at": bson::DateTime::from_millis(1_632_272_568_000),
            "blob": Binary { subtype: BinarySubtype::Generic, bytes: vec![9, 9] },
            "nested": {"nan": f64::NAN, "list": [1, "two"]},
        };
        let once = Value::Object(sanitize(&source));

        // Feed the sanitized output back through: every value is already
        // JSON-native and must pass through unchanged.
        let reparsed = match Bson::try_from(once.clone()).unwrap() {
            Bson::Document(doc) => doc,
            other => panic!("expected document, got {other:?}"),
        };
        let twice = Value::Object(sanitize(&reparsed));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_type_closure() {
        fn assert_json_safe(value: &Value) {
            match value {
                Value::Array(items) => items.iter().for_each(assert_json_safe),
                Value::Object(map) => map.values().for_each(assert_json_safe),
                Value::Number(n) => {
                    assert!(n.is_i64() || n.is_u64() || n.as_f64().unwrap().is_finite())
                }
                Value::Null | Value::Bool(_) | Value::String(_) => {}
            }
        }

        let source = doc! {
            "oid": ObjectId::new(),
            "at": bson::DateTime::now(),
            "ts": Bson::Timestamp(bson::Timestamp { time: 1_632_272_568, increment: 3 }),
            "bin": Binary { subtype: BinarySubtype::Generic, bytes: vec![0, 255] },
            "regex": Bson::RegularExpression(bson::Regex {
                pattern: "^a.*".to_string(),
                options: "i".to_string(),
            }),
            "decimal": "1.25".parse::<bson::Decimal128>().unwrap(),
            "inf": f64::INFINITY,
            "deep": [{"more": [ObjectId::new(), f64::NAN]}],
        };
        assert_json_safe(&Value::Object(sanitize(&source)));
    }

    #[test]
    fn test_regex_rendering() {
        let out = sanitize(&doc! {
            "pattern": Bson::RegularExpression(bson::Regex {
                pattern: "^ord-\\d+$".to_string(),
                options: "i".to_string(),
            }),
        });
        assert_eq!(out["pattern"], json!("(?i)^ord-\\d+$"));
    }
}
