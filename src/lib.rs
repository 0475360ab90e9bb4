//! mongotap: change-data-capture extraction from MongoDB and DocumentDB.
//!
//! Reads collections with two replication strategies and emits their records
//! as Singer-formatted messages on standard output:
//!
//! - **Incremental**: ordered `_id` scans bookmarked by a fused
//!   generation-time/document-id key ([`types::IncrementalId`]).
//! - **Log-based**: change stream consumption bookmarked by engine resume
//!   tokens, with engine-version-aware resume ([`resume`]) and recovery from
//!   token invalidation.
//!
//! The [`tap`] module is the driver; [`stream`] holds the per-stream state
//! machine and the two readers; [`sanitize`] converts BSON values into the
//! JSON-safe record shape defined in [`record`].

pub mod config;
pub mod connector;
pub mod error;
pub mod record;
pub mod resume;
pub mod sanitize;
pub mod schema;
pub mod stream;
pub mod tap;
pub mod types;

pub use config::{DateTimeConversion, TapConfig, DEFAULT_START_DATE};
pub use error::TapError;
pub use record::{ChangeRecord, Namespace};
pub use resume::{select_resume_strategy, ResumeStrategy};
pub use types::{to_object_id, EngineVersion, IncrementalId};
