//! Singer message protocol for mongotap
//!
//! Provides the message types, catalog model, and persisted state document of
//! the Singer specification: newline-delimited JSON messages of type SCHEMA,
//! RECORD, and STATE written to standard output.
//!
//! # Architecture
//!
//! This crate is protocol-only and knows nothing about MongoDB:
//! - Defines the [`Message`] enum and a [`MessageWriter`] sink abstraction
//! - Provides [`Catalog`]/[`CatalogEntry`] with per-property selection masks
//! - Manages per-stream bookmarks in [`State`], including the generic
//!   bookmark-advancement routine used by sorted and unsorted streams
//!
//! The extractor crate builds records and drives a `MessageWriter`; nothing
//! here performs I/O besides the writer implementations.

mod catalog;
mod message;
mod state;

pub use catalog::{Catalog, CatalogEntry, MetadataEntry, ReplicationMethod};
pub use message::{JsonLinesWriter, Message, MessageWriter};
pub use state::{State, StateError, StreamBookmark};
