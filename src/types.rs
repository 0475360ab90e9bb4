//! Core identifier types: engine versions and the fused incremental
//! replication key.

use crate::error::TapError;
use bson::oid::ObjectId;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// MongoDB server version as an ordered (major, minor) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the leading `major.minor` out of a server version string such as
    /// `"6.0.4"` or `"5.0.24-documentdb"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts
            .next()?
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse()
            .ok()?;
        Some(Self { major, minor })
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

static INCREMENTAL_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<dt>\d{4}-\d{2}-\d{2}(T\d{2}:\d{2}:\d{2}\+00:00)?)(\|(?P<oid>[a-f0-9]{24}))?$")
        .expect("incremental id pattern is valid")
});

/// Replication key of a record emitted in incremental mode.
///
/// Pairs the document's generation time with its id hex:
/// `2021-09-22T01:02:48+00:00|614a80b81ad8c60001b7d5f3`.
///
/// A datetime alone is not unique within one second, so a run interrupted
/// mid-second could not resume without re-emitting documents; an id hex alone
/// does not sort as a string. The fused form stays lexicographically ordered
/// by time while still naming the exact document the bookmark points at. The
/// id half is optional when parsing so bookmarks written by earlier releases
/// (datetime-only) remain usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalId {
    datetime: DateTime<Utc>,
    object_id: Option<String>,
    date_only: bool,
}

impl IncrementalId {
    pub fn new(datetime: DateTime<Utc>, object_id: Option<String>) -> Self {
        Self {
            datetime,
            object_id,
            date_only: false,
        }
    }

    /// Parse the string form. The datetime component is required; the id hex
    /// is optional.
    pub fn from_string(raw: &str) -> Result<Self, TapError> {
        let captures =
            INCREMENTAL_ID_PATTERN
                .captures(raw)
                .ok_or_else(|| TapError::InvalidFormat {
                    value: raw.to_string(),
                    reason: "expected ISO-8601 datetime optionally followed by |<24-hex id>"
                        .to_string(),
                })?;

        let dt_raw = &captures["dt"];
        let date_only = !dt_raw.contains('T');
        let datetime = if date_only {
            let date = NaiveDate::parse_from_str(dt_raw, "%Y-%m-%d").map_err(|err| {
                TapError::InvalidFormat {
                    value: raw.to_string(),
                    reason: err.to_string(),
                }
            })?;
            date.and_time(NaiveTime::MIN).and_utc()
        } else {
            DateTime::parse_from_rfc3339(dt_raw)
                .map_err(|err| TapError::InvalidFormat {
                    value: raw.to_string(),
                    reason: err.to_string(),
                })?
                .with_timezone(&Utc)
        };

        Ok(Self {
            datetime,
            object_id: captures.name("oid").map(|m| m.as_str().to_string()),
            date_only,
        })
    }

    /// Build from a document id: generation time plus the full id hex.
    pub fn from_object_id(object_id: &ObjectId) -> Self {
        Self {
            datetime: object_id.timestamp().to_chrono(),
            object_id: Some(object_id.to_hex()),
            date_only: false,
        }
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }

    pub fn object_id_hex(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// The id this key identifies. When the id half is absent (datetime-only
    /// bookmark from an earlier release) an id is synthesized from the
    /// generation time, usable as an exclusive query lower bound.
    pub fn object_id(&self) -> Result<ObjectId, TapError> {
        match &self.object_id {
            Some(hex) => ObjectId::parse_str(hex).map_err(|err| TapError::InvalidFormat {
                value: hex.clone(),
                reason: err.to_string(),
            }),
            None => {
                let seconds = self.datetime.timestamp().max(0) as u32;
                let mut bytes = [0u8; 12];
                bytes[..4].copy_from_slice(&seconds.to_be_bytes());
                Ok(ObjectId::from_bytes(bytes))
            }
        }
    }
}

impl fmt::Display for IncrementalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.date_only {
            write!(f, "{}", self.datetime.format("%Y-%m-%d"))?;
        } else {
            write!(f, "{}", self.datetime.format("%Y-%m-%dT%H:%M:%S+00:00"))?;
        }
        if let Some(hex) = &self.object_id {
            write!(f, "|{hex}")?;
        }
        Ok(())
    }
}

/// Convert a replication key value (or ISO date string) into the ObjectId to
/// scan from.
pub fn to_object_id(replication_key_value: &str) -> Result<ObjectId, TapError> {
    IncrementalId::from_string(replication_key_value)?.object_id()
}
