//! Tracefold: span and annotation ingestion with cumulative span-tree
//! counters and event-driven cache invalidation.

mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
