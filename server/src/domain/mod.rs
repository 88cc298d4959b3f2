//! Domain logic
//!
//! - `ingest` - batched span and annotation writers
//! - `events` - DML events and cache invalidation

pub mod events;
pub mod ingest;

pub use events::{DmlEvent, DmlEventDispatcher, DmlEventKind, LastUpdatedAt};
pub use ingest::{IngestRecord, IngestionEngine};
