//! Periodic batch persistence
//!
//! Producers `enqueue` without touching the database. A background loop
//! swaps the queue out on every tick, splits it into chunks and hands each
//! chunk to a `BatchWriter` inside its own transaction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::SqliteConnection;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::IngestConfig;
use crate::data::{SqliteError, SqliteService};
use crate::domain::events::{DmlEvent, DmlEventDispatcher};

/// Persists one chunk of queued items
///
/// The flusher owns the transaction; the writer isolates individual items
/// with savepoints and returns the events to dispatch after commit.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    type Item: Send + 'static;

    /// Used in log fields
    const NAME: &'static str;

    async fn write_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: Vec<Self::Item>,
    ) -> Result<Vec<DmlEvent>, SqliteError>;
}

/// Result of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub items: usize,
    pub chunks: usize,
    pub failed_chunks: usize,
}

pub struct BatchFlusher<W: BatchWriter> {
    writer: W,
    queue: Mutex<Vec<W::Item>>,
    db: Arc<SqliteService>,
    dispatcher: Arc<DmlEventDispatcher>,
    flush_interval: Duration,
    batch_size: usize,
}

impl<W: BatchWriter> BatchFlusher<W> {
    pub fn new(
        writer: W,
        db: Arc<SqliteService>,
        dispatcher: Arc<DmlEventDispatcher>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            writer,
            queue: Mutex::new(Vec::new()),
            db,
            dispatcher,
            flush_interval: config.flush_interval,
            batch_size: config.batch_size.max(1),
        }
    }

    pub fn enqueue(&self, item: W::Item) {
        self.queue.lock().push(item);
    }

    /// Items waiting for the next flush
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Persist everything queued so far
    pub async fn flush(&self) -> FlushStats {
        let items = std::mem::take(&mut *self.queue.lock());
        if items.is_empty() {
            return FlushStats::default();
        }

        let mut stats = FlushStats {
            items: items.len(),
            ..Default::default()
        };
        let mut items = items.into_iter();
        loop {
            let chunk: Vec<W::Item> = items.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            stats.chunks += 1;
            let size = chunk.len();

            match self.persist_chunk(chunk).await {
                Ok(events) => {
                    for event in &events {
                        self.dispatcher.put(event);
                    }
                }
                Err(e) => {
                    stats.failed_chunks += 1;
                    tracing::warn!(
                        writer = W::NAME,
                        items = size,
                        error = %e,
                        "Failed to persist chunk"
                    );
                }
            }
        }

        tracing::debug!(
            writer = W::NAME,
            items = stats.items,
            chunks = stats.chunks,
            failed_chunks = stats.failed_chunks,
            "Flushed queue"
        );
        stats
    }

    async fn persist_chunk(&self, chunk: Vec<W::Item>) -> Result<Vec<DmlEvent>, SqliteError> {
        let _guard = self.db.write_lock().await;
        let mut tx = self.db.pool().begin().await?;
        let events = self.writer.write_chunk(&mut *tx, chunk).await?;
        tx.commit().await?;
        Ok(events)
    }

    /// Spawn the periodic flush loop
    ///
    /// After shutdown is signalled the loop flushes once more and exits.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let flusher = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(flusher.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::debug!(writer = W::NAME, "Batch flusher started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        flusher.flush().await;
                    }
                }
            }

            let stats = flusher.flush().await;
            tracing::debug!(
                writer = W::NAME,
                items = stats.items,
                "Batch flusher shutdown complete"
            );
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheConfig, EvictionPolicy};
    use crate::data::CacheService;
    use crate::data::sqlite::repositories::get_or_create_project;
    use crate::domain::events::LastUpdatedAt;

    /// Stores each item as a project name; items starting with "fail" abort
    /// the whole chunk
    struct ProjectNameWriter;

    #[async_trait]
    impl BatchWriter for ProjectNameWriter {
        type Item = String;
        const NAME: &'static str = "project_names";

        async fn write_chunk(
            &self,
            conn: &mut SqliteConnection,
            chunk: Vec<String>,
        ) -> Result<Vec<DmlEvent>, SqliteError> {
            let mut project_ids = Vec::new();
            for name in chunk {
                if name.starts_with("fail") {
                    return Err(SqliteError::Database(sqlx::Error::RowNotFound));
                }
                project_ids.push(get_or_create_project(conn, &name).await?);
            }
            Ok(vec![DmlEvent::SpanInsert { project_ids }])
        }
    }

    async fn flusher(
        batch_size: usize,
    ) -> (
        Arc<SqliteService>,
        Arc<LastUpdatedAt>,
        BatchFlusher<ProjectNameWriter>,
    ) {
        let db = Arc::new(SqliteService::open_in_memory().await.unwrap());
        let cache = Arc::new(CacheService::new(&CacheConfig {
            max_entries: 100,
            eviction_policy: EvictionPolicy::Lru,
        }));
        let last_updated = Arc::new(LastUpdatedAt::new());
        let dispatcher = Arc::new(DmlEventDispatcher::with_default_handlers(
            db.clone(),
            cache,
            last_updated.clone(),
            Duration::from_secs(1),
        ));
        let config = IngestConfig {
            batch_size,
            ..Default::default()
        };
        let flusher = BatchFlusher::new(ProjectNameWriter, db.clone(), dispatcher, &config);
        (db, last_updated, flusher)
    }

    async fn project_names(db: &SqliteService) -> Vec<String> {
        sqlx::query_scalar("SELECT name FROM projects ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_flush_empty_queue() {
        let (_, _, flusher) = flusher(10).await;
        assert_eq!(flusher.flush().await, FlushStats::default());
    }

    #[tokio::test]
    async fn test_flush_splits_into_chunks() {
        let (db, _, flusher) = flusher(2).await;
        for name in ["a", "b", "c", "d", "e"] {
            flusher.enqueue(name.to_string());
        }
        assert_eq!(flusher.pending(), 5);

        let stats = flusher.flush().await;
        assert_eq!(
            stats,
            FlushStats {
                items: 5,
                chunks: 3,
                failed_chunks: 0
            }
        );
        assert_eq!(flusher.pending(), 0);
        assert_eq!(project_names(&db).await, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_the_rest() {
        let (db, _, flusher) = flusher(2).await;
        for name in ["a", "b", "c", "fail", "d", "e"] {
            flusher.enqueue(name.to_string());
        }

        let stats = flusher.flush().await;
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.failed_chunks, 1);
        // The failed chunk ("c", "fail") is rolled back as a whole
        assert_eq!(project_names(&db).await, vec!["a", "b", "d", "e"]);
    }

    #[tokio::test]
    async fn test_events_dispatched_after_commit() {
        let (db, last_updated, flusher) = flusher(10).await;
        flusher.enqueue("a".to_string());
        flusher.flush().await;
        flusher.dispatcher.drain_all().await;

        let id: i64 = sqlx::query_scalar("SELECT id FROM projects WHERE name = 'a'")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert!(last_updated.get("projects", id).is_some());
    }

    #[tokio::test]
    async fn test_loop_flushes_on_shutdown() {
        let (db, _, flusher) = flusher(10).await;
        let flusher = Arc::new(flusher);
        let (tx, rx) = watch::channel(false);
        let handle = flusher.start(rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        flusher.enqueue("late".to_string());
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(project_names(&db).await, vec!["late"]);
    }
}
