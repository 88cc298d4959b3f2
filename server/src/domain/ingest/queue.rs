//! Retrying annotation queue
//!
//! Annotations may arrive before the span or trace they describe. Each
//! drain resolves targets in one query and sorts the ready items into
//! insertable, postponed and discarded. Postponed items come back after
//! `retry_delay`; every postponement spends one retry.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::{Connection, SqliteConnection};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::IngestConfig;
use crate::data::sqlite::repositories::{AnnotationTable, NewAnnotation, upsert_annotations};
use crate::data::{SqliteError, SqliteService};
use crate::domain::events::{DmlEvent, DmlEventDispatcher};

/// An annotation that names its target by external id
#[async_trait]
pub trait AnnotationPrecursor: Clone + Send + Sync + 'static {
    /// What a resolved target id maps to
    type Target: Copy + Send + Sync + 'static;

    const TABLE: AnnotationTable;

    /// External id of the span or trace this annotation belongs to
    fn target_id(&self) -> &str;

    fn name(&self) -> &str;

    /// Look up many target ids at once; unresolved ids are absent
    async fn resolve_targets(
        conn: &mut SqliteConnection,
        target_ids: &[String],
    ) -> Result<HashMap<String, Self::Target>, SqliteError>;

    /// Build the row to store, or explain why the target can never accept it
    fn to_row(&self, target: Self::Target) -> Result<NewAnnotation, String>;
}

/// A queued annotation and its retry state
#[derive(Debug, Clone)]
pub struct Pending<P> {
    pub item: P,
    pub received_at: DateTime<Utc>,
    pub retries_left: u32,
    pub ready_at: Instant,
}

/// Result of one drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOutcome {
    pub inserted: usize,
    pub postponed: usize,
    pub discarded: usize,
}

struct Attempt<P> {
    inserted: Vec<i64>,
    retry: Vec<Pending<P>>,
    discarded: usize,
}

type UniqueKey = (i64, Option<i64>, String);

pub struct AnnotationQueue<P: AnnotationPrecursor> {
    queue: Mutex<Vec<Pending<P>>>,
    db: Arc<SqliteService>,
    dispatcher: Arc<DmlEventDispatcher>,
    flush_interval: Duration,
    retry_delay: Duration,
    retry_allowance: u32,
}

impl<P: AnnotationPrecursor> AnnotationQueue<P> {
    pub fn new(
        db: Arc<SqliteService>,
        dispatcher: Arc<DmlEventDispatcher>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            db,
            dispatcher,
            flush_interval: config.flush_interval,
            retry_delay: config.retry_delay,
            retry_allowance: config.retry_allowance,
        }
    }

    pub fn enqueue(&self, item: P) {
        let pending = Pending {
            item,
            received_at: Utc::now(),
            retries_left: self.retry_allowance,
            ready_at: Instant::now(),
        };
        self.queue.lock().push(pending);
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn take_ready(&self, now: Instant) -> Vec<Pending<P>> {
        let mut queue = self.queue.lock();
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut *queue)
            .into_iter()
            .partition(|pending| pending.ready_at <= now);
        *queue = waiting;
        ready
    }

    /// Attempt every item whose `ready_at` has passed
    pub async fn process(&self, now: Instant) -> QueueOutcome {
        let ready = self.take_ready(now);
        if ready.is_empty() {
            return QueueOutcome::default();
        }

        let attempt = {
            let _guard = self.db.write_lock().await;
            match self.insert(ready.clone()).await {
                Ok(attempt) => attempt,
                Err(e) => {
                    tracing::warn!(
                        table = P::TABLE.as_str(),
                        count = ready.len(),
                        error = %e,
                        "Annotation insert failed, postponing batch"
                    );
                    Attempt {
                        inserted: Vec::new(),
                        retry: ready,
                        discarded: 0,
                    }
                }
            }
        };

        let mut outcome = QueueOutcome {
            inserted: attempt.inserted.len(),
            postponed: 0,
            discarded: attempt.discarded,
        };

        let mut postponed = Vec::new();
        for mut pending in attempt.retry {
            if pending.retries_left == 0 {
                outcome.discarded += 1;
                tracing::warn!(
                    table = P::TABLE.as_str(),
                    target_id = pending.item.target_id(),
                    name = pending.item.name(),
                    "Discarding annotation after exhausting retries"
                );
            } else {
                pending.retries_left -= 1;
                pending.ready_at = now + self.retry_delay;
                postponed.push(pending);
            }
        }
        outcome.postponed = postponed.len();
        self.queue.lock().extend(postponed);

        if !attempt.inserted.is_empty() {
            self.dispatcher
                .put(&DmlEvent::annotation(P::TABLE, attempt.inserted));
        }

        tracing::debug!(
            table = P::TABLE.as_str(),
            inserted = outcome.inserted,
            postponed = outcome.postponed,
            discarded = outcome.discarded,
            "Processed annotation queue"
        );
        outcome
    }

    /// One transaction: resolve, partition, bulk upsert with per-item fallback
    async fn insert(&self, items: Vec<Pending<P>>) -> Result<Attempt<P>, SqliteError> {
        let mut tx = self.db.pool().begin().await?;

        let mut target_ids: Vec<String> = items
            .iter()
            .map(|pending| pending.item.target_id().to_string())
            .collect();
        target_ids.sort();
        target_ids.dedup();
        let targets = P::resolve_targets(&mut *tx, &target_ids).await?;

        let mut retry = Vec::new();
        let mut discarded = 0;
        let mut latest: BTreeMap<UniqueKey, (Pending<P>, NewAnnotation)> = BTreeMap::new();

        for pending in items {
            let Some(target) = targets.get(pending.item.target_id()).copied() else {
                retry.push(pending);
                continue;
            };
            let row = match pending.item.to_row(target) {
                Ok(row) => row,
                Err(reason) => {
                    discarded += 1;
                    tracing::warn!(
                        table = P::TABLE.as_str(),
                        target_id = pending.item.target_id(),
                        name = pending.item.name(),
                        reason = %reason,
                        "Discarding invalid annotation"
                    );
                    continue;
                }
            };

            let key = (
                row.target_rowid,
                row.document_position,
                row.fields.name.clone(),
            );
            match latest.entry(key) {
                Entry::Occupied(mut entry) => {
                    discarded += 1;
                    if pending.received_at >= entry.get().0.received_at {
                        entry.insert((pending, row));
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert((pending, row));
                }
            }
        }

        let rows: Vec<(Pending<P>, NewAnnotation)> = latest.into_values().collect();
        let mut inserted = Vec::with_capacity(rows.len());
        if !rows.is_empty() {
            let annotations: Vec<NewAnnotation> = rows.iter().map(|(_, row)| row.clone()).collect();
            let mut savepoint = Connection::begin(&mut *tx).await?;
            let result = upsert_annotations(&mut *savepoint, P::TABLE, &annotations).await;
            match result {
                Ok(ids) => {
                    savepoint.commit().await?;
                    inserted = ids;
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(
                        table = P::TABLE.as_str(),
                        count = rows.len(),
                        error = %e,
                        "Bulk annotation upsert failed, inserting individually"
                    );
                    for (pending, row) in rows {
                        let mut savepoint = Connection::begin(&mut *tx).await?;
                        let result =
                            upsert_annotations(&mut *savepoint, P::TABLE, std::slice::from_ref(&row))
                                .await;
                        match result {
                            Ok(ids) => {
                                savepoint.commit().await?;
                                inserted.extend(ids);
                            }
                            Err(e) => {
                                savepoint.rollback().await?;
                                tracing::warn!(
                                    table = P::TABLE.as_str(),
                                    target_id = pending.item.target_id(),
                                    name = pending.item.name(),
                                    error = %e,
                                    "Annotation upsert failed"
                                );
                                retry.push(pending);
                            }
                        }
                    }
                }
            }
        }

        tx.commit().await?;
        Ok(Attempt {
            inserted,
            retry,
            discarded,
        })
    }

    /// Attempt everything still queued, ready or not, and drop what remains
    pub async fn process_remaining(&self) -> QueueOutcome {
        let now = Instant::now();
        self.queue
            .lock()
            .iter_mut()
            .for_each(|pending| pending.ready_at = now);

        let outcome = self.process(now).await;
        let dropped = std::mem::take(&mut *self.queue.lock()).len();
        if dropped > 0 {
            tracing::warn!(
                table = P::TABLE.as_str(),
                dropped,
                "Dropping annotations whose targets never arrived"
            );
        }
        outcome
    }

    /// Spawn the periodic drain loop
    ///
    /// On shutdown the loop runs `process_remaining` once and exits.
    pub fn start(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            tracing::debug!(table = P::TABLE.as_str(), "Annotation queue started");

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        queue.process(Instant::now()).await;
                    }
                }
            }

            let outcome = queue.process_remaining().await;
            tracing::debug!(
                table = P::TABLE.as_str(),
                inserted = outcome.inserted,
                "Annotation queue shutdown complete"
            );
        })
    }
}
