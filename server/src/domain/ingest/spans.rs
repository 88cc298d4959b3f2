//! Span writer
//!
//! Each span is written inside its own savepoint so one bad span cannot
//! roll back its chunk-mates, and a duplicate leaves no trace at all.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Connection, SqliteConnection};

use super::flusher::BatchWriter;
use crate::data::SqliteError;
use crate::data::sqlite::repositories::{
    CumulativeCounts, add_to_ancestors, get_or_create_project, insert_span, link_trace_to_session,
    set_cumulative, sum_children_cumulative, upsert_session, upsert_trace, widen_session,
};
use crate::data::types::Span;
use crate::domain::events::DmlEvent;
use crate::utils::time::datetime_to_micros;

/// Writes `(span, project name)` pairs
pub struct SpanWriter;

#[async_trait]
impl BatchWriter for SpanWriter {
    type Item = (Span, String);
    const NAME: &'static str = "spans";

    async fn write_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: Vec<(Span, String)>,
    ) -> Result<Vec<DmlEvent>, SqliteError> {
        let mut project_ids = BTreeSet::new();

        for (span, project_name) in chunk {
            let mut savepoint = conn.begin().await?;
            let result = write_span(&mut *savepoint, &span, &project_name).await;
            match result {
                Ok(Some(project_id)) => {
                    savepoint.commit().await?;
                    project_ids.insert(project_id);
                }
                Ok(None) => {
                    savepoint.rollback().await?;
                    tracing::debug!(span_id = %span.span_id, "Skipping duplicate span");
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(
                        span_id = %span.span_id,
                        trace_id = %span.trace_id,
                        error = %e,
                        "Failed to insert span"
                    );
                }
            }
        }

        Ok(project_ids
            .into_iter()
            .map(|project_id| DmlEvent::SpanInsert {
                project_ids: vec![project_id],
            })
            .collect())
    }
}

/// Insert one span and fold its counters into the stored tree
///
/// Returns the project the span landed in, or `None` for a duplicate. The
/// caller must roll back on `None`: the project, trace and session upserts
/// above the duplicate check have already run.
async fn write_span(
    conn: &mut SqliteConnection,
    span: &Span,
    project_name: &str,
) -> Result<Option<i64>, SqliteError> {
    let project_id = get_or_create_project(conn, project_name).await?;
    let trace = upsert_trace(
        conn,
        project_id,
        &span.trace_id,
        datetime_to_micros(&span.start_time),
        datetime_to_micros(&span.end_time),
    )
    .await?;

    let session_rowid = match span.session_id() {
        Some(session_id) => Some(
            upsert_session(
                conn,
                trace.project_id,
                &session_id,
                trace.start_time,
                trace.end_time,
            )
            .await?,
        ),
        None => None,
    };
    match (trace.project_session_id, session_rowid) {
        (None, Some(session_rowid)) => {
            link_trace_to_session(conn, trace.id, session_rowid).await?;
        }
        (Some(linked), attached) if attached != Some(linked) => {
            // The trace already belongs to a session; its bounds follow the trace
            widen_session(conn, linked, trace.start_time, trace.end_time).await?;
        }
        _ => {}
    }

    let Some(span_rowid) = insert_span(conn, trace.id, span).await? else {
        return Ok(None);
    };

    let own = CumulativeCounts::own(span);
    let children = sum_children_cumulative(conn, &span.span_id).await?;
    let total = own + children;
    if !children.is_zero() {
        set_cumulative(conn, span_rowid, total).await?;
    }

    if let Some(parent_id) = &span.parent_id
        && !total.is_zero()
    {
        let updated = add_to_ancestors(conn, parent_id, span_rowid, total).await?;
        tracing::trace!(span_id = %span.span_id, ancestors = updated, "Propagated cumulative counts");
    }

    Ok(Some(trace.project_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SqliteService;
    use crate::data::sqlite::repositories::{get_cumulative, get_session, get_trace};
    use crate::data::types::{SpanKind, SpanStatusCode};
    use chrono::DateTime;
    use serde_json::{Value as JsonValue, json};

    fn span(span_id: &str, trace_id: &str, parent_id: Option<&str>) -> Span {
        Span {
            span_id: span_id.to_string(),
            trace_id: trace_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            name: span_id.to_string(),
            span_kind: SpanKind::Llm,
            start_time: at(0),
            end_time: at(1),
            attributes: json!({}),
            events: vec![],
            status_code: SpanStatusCode::Ok,
            status_message: String::new(),
        }
    }

    fn at(secs: i64) -> chrono::DateTime<chrono::Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn with_tokens(mut span: Span, prompt: i64, completion: i64) -> Span {
        span.attributes = json!({"llm": {"token_count": {"prompt": prompt, "completion": completion}}});
        span
    }

    fn failed(mut span: Span) -> Span {
        span.status_code = SpanStatusCode::Error;
        span
    }

    async fn write(db: &SqliteService, spans: Vec<Span>) -> Vec<DmlEvent> {
        let mut tx = db.pool().begin().await.unwrap();
        let items = spans.into_iter().map(|s| (s, "default".to_string())).collect();
        let events = SpanWriter.write_chunk(&mut *tx, items).await.unwrap();
        tx.commit().await.unwrap();
        events
    }

    async fn cumulative(db: &SqliteService, span_id: &str) -> CumulativeCounts {
        let mut conn = db.pool().acquire().await.unwrap();
        get_cumulative(&mut conn, span_id).await.unwrap().unwrap()
    }

    fn counts(errors: i64, prompt: i64, completion: i64) -> CumulativeCounts {
        CumulativeCounts {
            error_count: errors,
            llm_token_count_prompt: prompt,
            llm_token_count_completion: completion,
        }
    }

    /// R ─┬─ A ── C
    ///    └─ B
    fn tree() -> Vec<Span> {
        vec![
            with_tokens(span("R", "t1", None), 1, 2),
            with_tokens(span("A", "t1", Some("R")), 10, 20),
            with_tokens(span("B", "t1", Some("R")), 100, 200),
            failed(with_tokens(span("C", "t1", Some("A")), 1000, 2000)),
        ]
    }

    async fn assert_tree_totals(db: &SqliteService) {
        assert_eq!(cumulative(db, "R").await, counts(1, 1111, 2222));
        assert_eq!(cumulative(db, "A").await, counts(1, 1010, 2020));
        assert_eq!(cumulative(db, "B").await, counts(0, 100, 200));
        assert_eq!(cumulative(db, "C").await, counts(1, 1000, 2000));
    }

    fn permutations(items: Vec<Span>) -> Vec<Vec<Span>> {
        if items.len() <= 1 {
            return vec![items];
        }
        let mut result = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.clone();
            let head = rest.remove(i);
            for mut tail in permutations(rest) {
                tail.insert(0, head.clone());
                result.push(tail);
            }
        }
        result
    }

    #[tokio::test]
    async fn test_every_arrival_order_gives_same_totals() {
        let orders = permutations(tree());
        assert_eq!(orders.len(), 24);

        for order in orders {
            let db = SqliteService::open_in_memory().await.unwrap();
            for span in order {
                write(&db, vec![span]).await;
            }
            assert_tree_totals(&db).await;
        }
    }

    #[tokio::test]
    async fn test_arrival_order_within_one_chunk() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut spans = tree();
        spans.reverse();
        write(&db, spans).await;
        assert_tree_totals(&db).await;
    }

    #[tokio::test]
    async fn test_grandchild_first_is_counted_once() {
        // A ── B ── C, inserted C, A, B
        let db = SqliteService::open_in_memory().await.unwrap();
        write(&db, vec![with_tokens(span("C", "t1", Some("B")), 5, 0)]).await;
        write(&db, vec![with_tokens(span("A", "t1", None), 1, 0)]).await;
        assert_eq!(cumulative(&db, "A").await, counts(0, 1, 0));

        write(&db, vec![with_tokens(span("B", "t1", Some("A")), 2, 0)]).await;
        assert_eq!(cumulative(&db, "C").await, counts(0, 5, 0));
        assert_eq!(cumulative(&db, "B").await, counts(0, 7, 0));
        assert_eq!(cumulative(&db, "A").await, counts(0, 8, 0));
    }

    #[tokio::test]
    async fn test_huge_token_counts_saturate() {
        let db = SqliteService::open_in_memory().await.unwrap();
        write(
            &db,
            vec![
                with_tokens(span("C", "t1", Some("R")), i64::MAX, 0),
                with_tokens(span("R", "t1", None), 1, 0),
                with_tokens(span("other", "t2", None), 5, 0),
            ],
        )
        .await;
        assert_eq!(cumulative(&db, "C").await, counts(0, i64::MAX, 0));
        assert_eq!(cumulative(&db, "R").await, counts(0, i64::MAX, 0));
        assert_eq!(cumulative(&db, "other").await, counts(0, 5, 0));

        // Pushed up to an ancestor that is already saturated
        write(&db, vec![with_tokens(span("D", "t1", Some("C")), 7, 0)]).await;
        assert_eq!(cumulative(&db, "R").await, counts(0, i64::MAX, 0));
        assert_eq!(cumulative(&db, "D").await, counts(0, 7, 0));
    }

    #[tokio::test]
    async fn test_negative_token_counts_contribute_nothing() {
        let db = SqliteService::open_in_memory().await.unwrap();
        write(&db, vec![with_tokens(span("R", "t1", None), 3, 4)]).await;
        write(&db, vec![with_tokens(span("A", "t1", Some("R")), -10, -10)]).await;
        assert_eq!(cumulative(&db, "A").await, counts(0, 0, 0));
        assert_eq!(cumulative(&db, "R").await, counts(0, 3, 4));
    }

    #[tokio::test]
    async fn test_duplicate_span_is_a_no_op() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let root = with_tokens(span("R", "t1", None), 3, 4);
        let child = failed(with_tokens(span("A", "t1", Some("R")), 10, 20));

        let events = write(&db, vec![root.clone(), child.clone()]).await;
        assert_eq!(events.len(), 1);

        let mut late = child.clone();
        late.start_time = at(-100);
        let events = write(&db, vec![late, child]).await;
        assert!(events.is_empty());

        assert_eq!(cumulative(&db, "R").await, counts(1, 13, 24));
        assert_eq!(cumulative(&db, "A").await, counts(1, 10, 20));

        // The duplicate's earlier start time was rolled back with it
        let mut conn = db.pool().acquire().await.unwrap();
        let trace = get_trace(&mut conn, "t1").await.unwrap().unwrap();
        assert_eq!(trace.start_time, datetime_to_micros(&at(0)));
    }

    #[tokio::test]
    async fn test_one_event_per_project() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut tx = db.pool().begin().await.unwrap();
        let events = SpanWriter
            .write_chunk(
                &mut *tx,
                vec![
                    (span("a", "t1", None), "alpha".to_string()),
                    (span("b", "t1", Some("a")), "alpha".to_string()),
                    (span("c", "t2", None), "beta".to_string()),
                ],
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.ids().len() == 1));
    }

    #[tokio::test]
    async fn test_trace_and_session_bounds_only_widen() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let session: JsonValue = json!({"session": {"id": "sess-1"}});

        let mut first = span("a", "t1", None);
        first.start_time = at(10);
        first.end_time = at(20);
        first.attributes = session.clone();

        let mut earlier = span("b", "t1", Some("a"));
        earlier.start_time = at(5);
        earlier.end_time = at(15);

        let mut other_trace = span("c", "t2", None);
        other_trace.start_time = at(12);
        other_trace.end_time = at(30);
        other_trace.attributes = json!({"session.id": "sess-1"});

        let mut inside = span("d", "t1", Some("a"));
        inside.start_time = at(11);
        inside.end_time = at(12);

        for s in [first, earlier, other_trace, inside] {
            write(&db, vec![s]).await;
        }

        let mut conn = db.pool().acquire().await.unwrap();
        let t1 = get_trace(&mut conn, "t1").await.unwrap().unwrap();
        assert_eq!(t1.start_time, datetime_to_micros(&at(5)));
        assert_eq!(t1.end_time, datetime_to_micros(&at(20)));

        let t2 = get_trace(&mut conn, "t2").await.unwrap().unwrap();
        let session = get_session(&mut conn, "sess-1").await.unwrap().unwrap();
        assert_eq!(t1.project_session_id, Some(session.id));
        assert_eq!(t2.project_session_id, Some(session.id));
        assert_eq!(session.start_time, datetime_to_micros(&at(5)));
        assert_eq!(session.end_time, datetime_to_micros(&at(30)));
    }

    #[tokio::test]
    async fn test_blank_session_ignored_numeric_session_linked() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut blank = span("s1", "t1", None);
        blank.attributes = json!({"session.id": "   "});
        let mut numeric = span("s2", "t2", None);
        numeric.attributes = json!({"session": {"id": 42}});
        write(&db, vec![blank, numeric]).await;

        let mut conn = db.pool().acquire().await.unwrap();
        let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_sessions")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(sessions, 1);

        let session = get_session(&mut conn, "42").await.unwrap().unwrap();
        let t1 = get_trace(&mut conn, "t1").await.unwrap().unwrap();
        let t2 = get_trace(&mut conn, "t2").await.unwrap().unwrap();
        assert_eq!(t1.project_session_id, None);
        assert_eq!(t2.project_session_id, Some(session.id));
    }

    #[tokio::test]
    async fn test_bad_span_does_not_roll_back_siblings() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut tx = db.pool().begin().await.unwrap();
        let events = SpanWriter
            .write_chunk(
                &mut *tx,
                vec![
                    (span("a", "t1", None), "default".to_string()),
                    // Empty project names violate the projects CHECK constraint
                    (span("b", "t2", None), String::new()),
                    (span("c", "t1", Some("a")), "default".to_string()),
                ],
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(events.len(), 1);

        let stored: Vec<String> = sqlx::query_scalar("SELECT span_id FROM spans ORDER BY span_id")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(stored, vec!["a", "c"]);
    }
}
