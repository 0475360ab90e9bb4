//! Singer protocol messages and the newline-delimited JSON writer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;

/// A single Singer message.
///
/// Serializes to the wire shape expected by Singer targets: a JSON object
/// with a `type` discriminator of `SCHEMA`, `RECORD`, or `STATE`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    /// Declares the schema of a stream. Must precede the stream's records.
    #[serde(rename = "SCHEMA")]
    Schema {
        stream: String,
        schema: Value,
        key_properties: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        bookmark_properties: Option<Vec<String>>,
    },

    /// One extracted record.
    #[serde(rename = "RECORD")]
    Record {
        stream: String,
        record: Value,
        time_extracted: String,
    },

    /// A checkpoint of all stream bookmarks.
    #[serde(rename = "STATE")]
    State { value: Value },
}

impl Message {
    /// Build a RECORD message, rendering `time_extracted` as RFC 3339 UTC.
    pub fn record(stream: impl Into<String>, record: Value, time_extracted: DateTime<Utc>) -> Self {
        Message::Record {
            stream: stream.into(),
            record,
            time_extracted: time_extracted.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// Sink abstraction for Singer messages.
///
/// The extractor only ever appends messages; flushing is left to the
/// implementation so stdout writers can line-buffer.
pub trait MessageWriter {
    /// Write a single message to the sink.
    fn write_message(&mut self, message: &Message) -> anyhow::Result<()>;
}

/// Writes one JSON document per line to any [`Write`] sink.
///
/// This is the production writer over a locked stdout handle. Tests use it
/// over a `Vec<u8>` to capture the emitted lines.
pub struct JsonLinesWriter<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Consume the writer and return the underlying sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MessageWriter for JsonLinesWriter<W> {
    fn write_message(&mut self, message: &Message) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.out, message)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_to_string(messages: &[Message]) -> String {
        let mut writer = JsonLinesWriter::new(Vec::new());
        for message in messages {
            writer.write_message(message).unwrap();
        }
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_schema_message_wire_shape() {
        let message = Message::Schema {
            stream: "mydb_users".to_string(),
            schema: json!({"type": "object", "properties": {}}),
            key_properties: vec!["object_id".to_string()],
            bookmark_properties: Some(vec!["replication_key".to_string()]),
        };

        let line = write_to_string(&[message]);
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["type"], "SCHEMA");
        assert_eq!(parsed["stream"], "mydb_users");
        assert_eq!(parsed["key_properties"], json!(["object_id"]));
        assert_eq!(parsed["bookmark_properties"], json!(["replication_key"]));
    }

    #[test]
    fn test_record_message_wire_shape() {
        let extracted = DateTime::parse_from_rfc3339("2021-09-22T01:02:48+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let message = Message::record("mydb_users", json!({"object_id": "abc"}), extracted);

        let line = write_to_string(&[message]);
        let parsed: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed["type"], "RECORD");
        assert_eq!(parsed["record"]["object_id"], "abc");
        assert_eq!(parsed["time_extracted"], "2021-09-22T01:02:48.000000Z");
    }

    #[test]
    fn test_one_message_per_line() {
        let messages = vec![
            Message::State {
                value: json!({"bookmarks": {}}),
            },
            Message::State {
                value: json!({"bookmarks": {}}),
            },
        ];
        let output = write_to_string(&messages);
        assert_eq!(output.lines().count(), 2);
        for line in output.lines() {
            assert!(serde_json::from_str::<Value>(line).is_ok());
        }
    }
}
