//! Persisted per-stream bookmark state.
//!
//! The state document travels between runs as JSON:
//!
//! ```json
//! {"bookmarks": {"<stream_id>": {"replication_key": "replication_key",
//!                                "replication_key_value": "<bookmark>"}}}
//! ```
//!
//! Bookmark advancement is the single generic routine shared by sorted
//! (incremental) and unsorted (log-based) streams. Sorted streams fail hard on
//! a regression so a bad bookmark is never silently persisted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bookmark entry for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBookmark {
    /// Name of the replication key property (fixed to `replication_key`).
    pub replication_key: String,
    /// Last emitted replication key value.
    pub replication_key_value: String,
}

/// Error raised by bookmark advancement.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A sorted stream produced a replication key value older than its
    /// bookmark. Persisting it would silently rewind the stream.
    #[error(
        "stream '{stream}' is marked sorted but replication key value '{latest}' \
         is older than bookmark '{bookmark}'"
    )]
    OutOfOrder {
        stream: String,
        bookmark: String,
        latest: String,
    },
}

/// The whole state document: one bookmark per stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamBookmark>,
}

impl State {
    /// Parse a state document from its JSON form.
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// The bookmark value for a stream, if one has been persisted.
    pub fn bookmark(&self, stream_id: &str) -> Option<&str> {
        self.bookmarks
            .get(stream_id)
            .map(|b| b.replication_key_value.as_str())
    }

    /// Advance the bookmark of `stream_id` to `latest`.
    ///
    /// Creates the state entry lazily on first advancement. When `is_sorted`
    /// holds and `check_sorted` is enabled, a value that sorts below the
    /// current bookmark raises [`StateError::OutOfOrder`]; unsorted streams
    /// accept any value (the change stream's resume tokens are opaque).
    pub fn advance(
        &mut self,
        stream_id: &str,
        replication_key: &str,
        latest: &str,
        is_sorted: bool,
        check_sorted: bool,
    ) -> Result<(), StateError> {
        if let Some(existing) = self.bookmarks.get(stream_id) {
            if is_sorted && check_sorted && latest < existing.replication_key_value.as_str() {
                return Err(StateError::OutOfOrder {
                    stream: stream_id.to_string(),
                    bookmark: existing.replication_key_value.clone(),
                    latest: latest.to_string(),
                });
            }
        }
        self.bookmarks.insert(
            stream_id.to_string(),
            StreamBookmark {
                replication_key: replication_key.to_string(),
                replication_key_value: latest.to_string(),
            },
        );
        Ok(())
    }

    /// Render the state document for a STATE message.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("state serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookmark_created_lazily() {
        let mut state = State::default();
        assert_eq!(state.bookmark("mydb_users"), None);

        state
            .advance("mydb_users", "replication_key", "2021-09-22T01:02:48+00:00", true, true)
            .unwrap();
        assert_eq!(state.bookmark("mydb_users"), Some("2021-09-22T01:02:48+00:00"));
    }

    #[test]
    fn test_sorted_stream_advances_monotonically() {
        let mut state = State::default();
        let values = [
            "2021-09-22T01:02:48+00:00|614a80b81ad8c60001b7d5f3",
            "2021-09-22T01:02:49+00:00|614a80b91ad8c60001b7d5f4",
            "2021-09-23T00:00:00+00:00|614bc4801ad8c60001b7d5f5",
        ];
        for value in values {
            state
                .advance("s", "replication_key", value, true, true)
                .unwrap();
            assert_eq!(state.bookmark("s"), Some(value));
        }
    }

    #[test]
    fn test_sorted_regression_is_rejected() {
        let mut state = State::default();
        state
            .advance("s", "replication_key", "2021-09-23T00:00:00+00:00", true, true)
            .unwrap();
        let err = state
            .advance("s", "replication_key", "2021-09-22T00:00:00+00:00", true, true)
            .unwrap_err();
        assert!(matches!(err, StateError::OutOfOrder { .. }));
        // The bookmark must be untouched by the failed advancement.
        assert_eq!(state.bookmark("s"), Some("2021-09-23T00:00:00+00:00"));
    }

    #[test]
    fn test_unsorted_stream_accepts_any_order() {
        let mut state = State::default();
        state
            .advance("s", "replication_key", "8263f5a8c4", false, true)
            .unwrap();
        state
            .advance("s", "replication_key", "0001aa", false, true)
            .unwrap();
        assert_eq!(state.bookmark("s"), Some("0001aa"));
    }

    #[test]
    fn test_state_document_roundtrip() {
        let raw = r#"{"bookmarks":{"mydb_users":{"replication_key":"replication_key","replication_key_value":"abc123"}}}"#;
        let state = State::from_json(raw).unwrap();
        assert_eq!(state.bookmark("mydb_users"), Some("abc123"));
        assert_eq!(serde_json::to_string(&state).unwrap(), raw);
    }

    #[test]
    fn test_empty_state_document() {
        let state = State::from_json("{}").unwrap();
        assert!(state.bookmarks.is_empty());
    }
}
