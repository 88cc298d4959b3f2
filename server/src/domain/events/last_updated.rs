//! Row-level "last changed" bookkeeping for change-polling consumers
//!
//! Per-row timestamps live in a bounded moka cache per table, so rows that
//! have not changed in a long while are forgotten. Per-table timestamps are
//! kept for the life of the process.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::sync::Cache;

use crate::core::constants::LAST_UPDATED_MAX_ROWS_PER_TABLE;

/// Last time each (table, row id) was changed by the ingestion path
pub struct LastUpdatedAt {
    max_rows_per_table: u64,
    rows: DashMap<&'static str, Cache<i64, DateTime<Utc>>>,
    tables: DashMap<&'static str, DateTime<Utc>>,
}

impl std::fmt::Debug for LastUpdatedAt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastUpdatedAt")
            .field("max_rows_per_table", &self.max_rows_per_table)
            .field("tables", &self.tables)
            .finish()
    }
}

impl Default for LastUpdatedAt {
    fn default() -> Self {
        Self::with_capacity(LAST_UPDATED_MAX_ROWS_PER_TABLE)
    }
}

impl LastUpdatedAt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_rows_per_table: u64) -> Self {
        Self {
            max_rows_per_table,
            rows: DashMap::new(),
            tables: DashMap::new(),
        }
    }

    pub fn set(&self, table: &'static str, id: i64, at: DateTime<Utc>) {
        let rows = self
            .rows
            .entry(table)
            .or_insert_with(|| Cache::new(self.max_rows_per_table))
            .clone();
        rows.entry(id)
            .and_upsert_with(|current| current.map_or(at, |entry| entry.into_value().max(at)));
        self.tables
            .entry(table)
            .and_modify(|current| *current = (*current).max(at))
            .or_insert(at);
    }

    pub fn get(&self, table: &'static str, id: i64) -> Option<DateTime<Utc>> {
        self.rows.get(table).and_then(|rows| rows.get(&id))
    }

    /// Most recent change anywhere in `table`
    pub fn latest(&self, table: &'static str) -> Option<DateTime<Utc>> {
        self.tables.get(table).map(|entry| *entry.value())
    }

    /// Number of rows of `table` currently remembered
    pub fn tracked_rows(&self, table: &'static str) -> u64 {
        self.rows.get(table).map_or(0, |rows| {
            rows.run_pending_tasks();
            rows.entry_count()
        })
    }
}
