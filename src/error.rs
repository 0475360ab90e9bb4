//! Error kinds of the extractor.
//!
//! Recoverable change-stream conditions (resume-token invalidation, idle
//! streams) are handled inside the log-based reader and never surface here;
//! these variants are the fatal or fall-back classes the driver loop and the
//! CLI report to the operator.

use crate::types::EngineVersion;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TapError {
    /// Unknown or malformed configuration option. Fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A bookmark or replication key value that does not parse. In
    /// incremental mode the reader falls back to `start_date` instead of
    /// failing on this.
    #[error("invalid replication key value '{value}': {reason}")]
    InvalidFormat { value: String, reason: String },

    /// Connection or server probe failure. Fatal.
    #[error("could not connect to MongoDB: {0}")]
    CannotConnect(String),

    /// Server too old for change streams. Fatal.
    #[error("unsupported MongoDB version {0}: change streams require 3.6 or newer")]
    UnsupportedEngine(EngineVersion),

    /// DocumentDB reported change streams disabled and auto-enablement was
    /// not opted into. Fatal.
    #[error(
        "change streams are not enabled on collection '{collection}'; \
         set allow_modify_change_streams to enable them automatically"
    )]
    ChangeStreamsDisabled { collection: String },

    /// The modifyChangeStreams admin command failed. Fatal.
    #[error("unable to enable change streams on collection '{collection}'")]
    CannotEnableChangeStream { collection: String },
}
