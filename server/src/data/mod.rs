//! Data storage layer
//!
//! - `sqlite` - the ingestion store: schema, migrations, repositories
//! - `cache` - in-memory cache for read-side aggregates
//! - `types` - span, evaluation and annotation values shared by every layer

pub mod cache;
pub mod sqlite;
pub mod types;

pub use cache::{CacheKey, CacheService};
pub use sqlite::{SqliteError, SqliteService};
