//! DML event handlers
//!
//! Every handler buffers the keys it saw since its last drain in a
//! deduplicating set, so a burst of events touching the same project or
//! annotation name costs one effect per drain.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::{DmlEvent, DmlEventKind, LastUpdatedAt};
use crate::data::sqlite::repositories::{AnnotationTable, project_names_for_annotations};
use crate::data::{CacheKey, CacheService, SqliteService};

#[async_trait]
pub trait DmlEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Events of this kind, or of any subtype, are routed here
    fn kind(&self) -> DmlEventKind;

    /// Record the keys of an event. Must not block.
    fn put(&self, event: &DmlEvent);

    /// Apply the buffered keys and return how many distinct keys were handled
    async fn drain(&self) -> usize;
}

// ============================================================================
// Last updated bookkeeping
// ============================================================================

pub struct LastUpdatedHandler {
    pending: Mutex<FxHashSet<(&'static str, i64)>>,
    store: Arc<LastUpdatedAt>,
}

impl LastUpdatedHandler {
    pub fn new(store: Arc<LastUpdatedAt>) -> Self {
        Self {
            pending: Mutex::new(FxHashSet::default()),
            store,
        }
    }
}

#[async_trait]
impl DmlEventHandler for LastUpdatedHandler {
    fn name(&self) -> &'static str {
        "last_updated"
    }

    fn kind(&self) -> DmlEventKind {
        DmlEventKind::Dml
    }

    fn put(&self, event: &DmlEvent) {
        let table = event.table();
        self.pending
            .lock()
            .extend(event.ids().iter().map(|id| (table, *id)));
    }

    async fn drain(&self) -> usize {
        let keys = std::mem::take(&mut *self.pending.lock());
        if keys.is_empty() {
            return 0;
        }
        let count = keys.len();
        let now = Utc::now();
        for (table, id) in keys {
            self.store.set(table, id, now);
        }
        count
    }
}

// ============================================================================
// Span aggregates
// ============================================================================

pub struct SpanCacheHandler {
    pending: Mutex<FxHashSet<i64>>,
    cache: Arc<CacheService>,
}

impl SpanCacheHandler {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self {
            pending: Mutex::new(FxHashSet::default()),
            cache,
        }
    }
}

#[async_trait]
impl DmlEventHandler for SpanCacheHandler {
    fn name(&self) -> &'static str {
        "span_cache"
    }

    fn kind(&self) -> DmlEventKind {
        DmlEventKind::Span
    }

    fn put(&self, event: &DmlEvent) {
        self.pending.lock().extend(event.ids().iter().copied());
    }

    async fn drain(&self) -> usize {
        let project_ids = std::mem::take(&mut *self.pending.lock());
        for project_id in &project_ids {
            let mut removed = 0;
            removed += self
                .cache
                .invalidate(&CacheKey::latency_quantile_pattern(*project_id))
                .await;
            removed += self
                .cache
                .invalidate(&CacheKey::token_count_pattern(*project_id))
                .await;
            removed += self
                .cache
                .invalidate(&CacheKey::record_count_pattern(*project_id))
                .await;
            self.cache
                .invalidate_key(&CacheKey::time_bounds(*project_id))
                .await;
            tracing::trace!(project_id, removed, "Invalidated span aggregates");
        }
        project_ids.len()
    }
}

// ============================================================================
// Annotation aggregates
// ============================================================================

/// Invalidates summaries for the (project, annotation name) pairs behind
/// changed annotation rows.
///
/// One instance per annotation table: `span()` handles span annotations,
/// `trace()` trace annotations and `document()` document annotations.
pub struct AnnotationCacheHandler {
    table: AnnotationTable,
    pending: Mutex<FxHashSet<i64>>,
    db: Arc<SqliteService>,
    cache: Arc<CacheService>,
}

impl AnnotationCacheHandler {
    fn new(table: AnnotationTable, db: Arc<SqliteService>, cache: Arc<CacheService>) -> Self {
        Self {
            table,
            pending: Mutex::new(FxHashSet::default()),
            db,
            cache,
        }
    }

    pub fn span(db: Arc<SqliteService>, cache: Arc<CacheService>) -> Self {
        Self::new(AnnotationTable::Span, db, cache)
    }

    pub fn trace(db: Arc<SqliteService>, cache: Arc<CacheService>) -> Self {
        Self::new(AnnotationTable::Trace, db, cache)
    }

    pub fn document(db: Arc<SqliteService>, cache: Arc<CacheService>) -> Self {
        Self::new(AnnotationTable::Document, db, cache)
    }

    fn pattern(&self, project_id: i64, name: &str) -> String {
        match self.table {
            AnnotationTable::Span => CacheKey::annotation_summary_pattern(project_id, "span", name),
            AnnotationTable::Trace => {
                CacheKey::annotation_summary_pattern(project_id, "trace", name)
            }
            AnnotationTable::Document => {
                CacheKey::document_evaluation_summary_pattern(project_id, name)
            }
        }
    }
}

#[async_trait]
impl DmlEventHandler for AnnotationCacheHandler {
    fn name(&self) -> &'static str {
        match self.table {
            AnnotationTable::Span => "span_annotation_cache",
            AnnotationTable::Trace => "trace_annotation_cache",
            AnnotationTable::Document => "document_annotation_cache",
        }
    }

    fn kind(&self) -> DmlEventKind {
        match self.table {
            AnnotationTable::Span => DmlEventKind::SpanAnnotation,
            AnnotationTable::Trace => DmlEventKind::TraceAnnotation,
            AnnotationTable::Document => DmlEventKind::DocumentAnnotation,
        }
    }

    fn put(&self, event: &DmlEvent) {
        self.pending.lock().extend(event.ids().iter().copied());
    }

    async fn drain(&self) -> usize {
        let ids: Vec<i64> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .collect();
        if ids.is_empty() {
            return 0;
        }

        let pairs = match project_names_for_annotations(self.db.pool(), self.table, &ids).await {
            Ok(pairs) => pairs,
            Err(e) => {
                tracing::warn!(
                    handler = self.name(),
                    count = ids.len(),
                    error = %e,
                    "Failed to resolve annotation projects, will retry"
                );
                self.pending.lock().extend(ids);
                return 0;
            }
        };

        for (project_id, name) in &pairs {
            self.cache.invalidate(&self.pattern(*project_id, name)).await;
        }
        pairs.len()
    }
}
