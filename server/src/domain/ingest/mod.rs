//! Ingestion engine
//!
//! Owns one flusher per strict writer (spans, evaluations), one retrying
//! queue per annotation kind and the DML event dispatcher they feed.

mod evaluations;
mod flusher;
mod precursors;
mod queue;
mod records;
mod spans;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use evaluations::{
    EvaluationInsertion, EvaluationWriter, InsertEvaluationError, insert_evaluation,
};
pub use flusher::{BatchFlusher, BatchWriter, FlushStats};
pub use queue::{AnnotationPrecursor, AnnotationQueue, Pending, QueueOutcome};
pub use records::IngestRecord;
pub use spans::SpanWriter;

use crate::core::config::AppConfig;
use crate::data::types::{
    DocumentAnnotationPrecursor, Evaluation, Precursor, Span, SpanAnnotationPrecursor,
    TraceAnnotationPrecursor,
};
use crate::data::{CacheService, SqliteService};
use crate::domain::events::{DmlEventDispatcher, LastUpdatedAt};

pub struct IngestionEngine {
    spans: Arc<BatchFlusher<SpanWriter>>,
    evaluations: Arc<BatchFlusher<EvaluationWriter>>,
    span_annotations: Arc<AnnotationQueue<SpanAnnotationPrecursor>>,
    trace_annotations: Arc<AnnotationQueue<TraceAnnotationPrecursor>>,
    document_annotations: Arc<AnnotationQueue<DocumentAnnotationPrecursor>>,
    dispatcher: Arc<DmlEventDispatcher>,
    last_updated: Arc<LastUpdatedAt>,
}

impl IngestionEngine {
    pub fn new(db: Arc<SqliteService>, cache: Arc<CacheService>, config: &AppConfig) -> Self {
        let last_updated = Arc::new(LastUpdatedAt::new());
        let dispatcher = Arc::new(DmlEventDispatcher::with_default_handlers(
            db.clone(),
            cache,
            last_updated.clone(),
            config.events.flush_interval,
        ));
        let ingest = &config.ingest;

        Self {
            spans: Arc::new(BatchFlusher::new(
                SpanWriter,
                db.clone(),
                dispatcher.clone(),
                ingest,
            )),
            evaluations: Arc::new(BatchFlusher::new(
                EvaluationWriter,
                db.clone(),
                dispatcher.clone(),
                ingest,
            )),
            span_annotations: Arc::new(AnnotationQueue::new(
                db.clone(),
                dispatcher.clone(),
                ingest,
            )),
            trace_annotations: Arc::new(AnnotationQueue::new(
                db.clone(),
                dispatcher.clone(),
                ingest,
            )),
            document_annotations: Arc::new(AnnotationQueue::new(db, dispatcher.clone(), ingest)),
            dispatcher,
            last_updated,
        }
    }

    pub fn enqueue_span(&self, span: Span, project_name: impl Into<String>) {
        self.spans.enqueue((span, project_name.into()));
    }

    pub fn enqueue_evaluation(&self, evaluation: Evaluation) {
        self.evaluations.enqueue(evaluation);
    }

    pub fn enqueue_precursor(&self, precursor: impl Into<Precursor>) {
        match precursor.into() {
            Precursor::Span(p) => self.span_annotations.enqueue(p),
            Precursor::Trace(p) => self.trace_annotations.enqueue(p),
            Precursor::Document(p) => self.document_annotations.enqueue(p),
        }
    }

    /// Route a decoded NDJSON record to its writer
    pub fn submit(&self, record: IngestRecord) {
        match record {
            IngestRecord::Span { project_name, span } => self.enqueue_span(span, project_name),
            IngestRecord::Evaluation(evaluation) => self.enqueue_evaluation(evaluation),
            IngestRecord::SpanAnnotation(p) => self.enqueue_precursor(p),
            IngestRecord::TraceAnnotation(p) => self.enqueue_precursor(p),
            IngestRecord::DocumentAnnotation(p) => self.enqueue_precursor(p),
        }
    }

    pub fn dispatcher(&self) -> &Arc<DmlEventDispatcher> {
        &self.dispatcher
    }

    pub fn last_updated(&self) -> &Arc<LastUpdatedAt> {
        &self.last_updated
    }

    /// Items waiting in any writer or queue
    pub fn pending(&self) -> usize {
        self.spans.pending()
            + self.evaluations.pending()
            + self.span_annotations.pending()
            + self.trace_annotations.pending()
            + self.document_annotations.pending()
    }

    /// Run every writer, queue and event handler once, in dependency order
    pub async fn flush_once(&self) {
        self.spans.flush().await;
        self.evaluations.flush().await;
        let now = Instant::now();
        self.span_annotations.process(now).await;
        self.trace_annotations.process(now).await;
        self.document_annotations.process(now).await;
        self.dispatcher.drain_all().await;
    }

    /// Start every background loop under one supervisor task
    ///
    /// On shutdown the stages stop in order so nothing is stranded: strict
    /// writers flush first, then the annotation queues get a last pass over
    /// everything they hold, then the event handlers drain what both emitted.
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let (queues_tx, queues_rx) = watch::channel(false);
        let (events_tx, events_rx) = watch::channel(false);

        let writers = vec![
            self.spans.start(shutdown_rx.clone()),
            self.evaluations.start(shutdown_rx),
        ];
        let queues = vec![
            self.span_annotations.start(queues_rx.clone()),
            self.trace_annotations.start(queues_rx.clone()),
            self.document_annotations.start(queues_rx),
        ];
        let handlers = self.dispatcher.start(events_rx);

        tokio::spawn(async move {
            futures::future::join_all(writers).await;
            let _ = queues_tx.send(true);
            futures::future::join_all(queues).await;
            let _ = events_tx.send(true);
            futures::future::join_all(handlers).await;
            tracing::debug!("Ingestion engine shutdown complete");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cli::CliConfig;
    use crate::data::CacheKey;
    use crate::data::sqlite::repositories::get_cumulative;
    use std::time::Duration;

    async fn engine() -> (Arc<SqliteService>, Arc<CacheService>, IngestionEngine) {
        let db = Arc::new(SqliteService::open_in_memory().await.unwrap());
        let mut config = AppConfig::load(&CliConfig::default()).unwrap();
        config.ingest.flush_interval = Duration::from_millis(10);
        config.events.flush_interval = Duration::from_millis(10);
        let cache = Arc::new(CacheService::new(&config.cache));
        let engine = IngestionEngine::new(db.clone(), cache.clone(), &config);
        (db, cache, engine)
    }

    fn records(lines: &[&str]) -> Vec<IngestRecord> {
        lines
            .iter()
            .map(|line| IngestRecord::parse_line(line).unwrap().unwrap())
            .collect()
    }

    const TRACE: &[&str] = &[
        r#"{"type":"span_annotation","span_id":"child","name":"quality","label":"good"}"#,
        r#"{"type":"span","project_name":"demo","span_id":"child","trace_id":"t1","parent_id":"root","name":"llm","start_time":"2024-01-01T00:00:01Z","end_time":"2024-01-01T00:00:02Z","status_code":"ERROR","attributes":{"llm.token_count.prompt":7}}"#,
        r#"{"type":"span","project_name":"demo","span_id":"root","trace_id":"t1","name":"agent","start_time":"2024-01-01T00:00:00Z","end_time":"2024-01-01T00:00:03Z"}"#,
        r#"{"type":"trace_annotation","trace_id":"t1","name":"correctness","score":1.0}"#,
    ];

    #[tokio::test]
    async fn test_flush_once_runs_writers_before_queues() {
        let (db, _, engine) = engine().await;
        for record in records(TRACE) {
            engine.submit(record);
        }
        assert_eq!(engine.pending(), 4);

        engine.flush_once().await;
        assert_eq!(engine.pending(), 0);

        let mut conn = db.pool().acquire().await.unwrap();
        let root = get_cumulative(&mut conn, "root").await.unwrap().unwrap();
        assert_eq!(root.error_count, 1);
        assert_eq!(root.llm_token_count_prompt, 7);
        drop(conn);

        let annotations: i64 = sqlx::query_scalar(
            "SELECT (SELECT COUNT(*) FROM span_annotations) + (SELECT COUNT(*) FROM trace_annotations)",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(annotations, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_every_stage() {
        let (db, cache, engine) = engine().await;

        let project_id = {
            let mut conn = db.pool().acquire().await.unwrap();
            crate::data::sqlite::repositories::get_or_create_project(&mut conn, "demo")
                .await
                .unwrap()
        };
        let bounds = CacheKey::time_bounds(project_id);
        cache.set(&bounds, &(0i64, 1i64), None).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = engine.start(rx);
        for record in records(TRACE) {
            engine.submit(record);
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(engine.pending(), 0);
        let spans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spans")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(spans, 2);
        let span_annotations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM span_annotations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(span_annotations, 1);

        assert!(!cache.exists(&bounds).await.unwrap());
        assert!(engine.last_updated().get("projects", project_id).is_some());
    }

    #[tokio::test]
    async fn test_strict_evaluation_is_not_retried() {
        let (db, _, engine) = engine().await;
        engine.submit(
            IngestRecord::parse_line(
                r#"{"type":"span","span_id":"s1","trace_id":"t1","name":"retrieve","start_time":"2024-01-01T00:00:00Z","end_time":"2024-01-01T00:00:01Z","attributes":{"retrieval":{"documents":[{}]}}}"#,
            )
            .unwrap()
            .unwrap(),
        );
        engine.flush_once().await;

        engine.submit(
            IngestRecord::parse_line(
                r#"{"type":"evaluation","subject":{"kind":"document","span_id":"s1","document_position":4},"name":"relevance"}"#,
            )
            .unwrap()
            .unwrap(),
        );
        engine.flush_once().await;
        assert_eq!(engine.pending(), 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_annotations")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
