//! Span repository
//!
//! Cumulative counters hold a span's own contribution plus the subtree
//! totals of every descendant that was already stored. The writer keeps
//! them exact for any arrival order by combining `sum_children_cumulative`
//! (pull from children that arrived early) with `add_to_ancestors` (push to
//! ancestors that arrived early).

use std::collections::HashMap;
use std::ops::Add;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::data::sqlite::SqliteError;
use crate::data::types::Span;
use crate::utils::time::datetime_to_micros;

/// Keys per `IN (...)` lookup
const LOOKUP_CHUNK_SIZE: usize = 500;

/// The three rolled-up counters carried by every span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CumulativeCounts {
    pub error_count: i64,
    pub llm_token_count_prompt: i64,
    pub llm_token_count_completion: i64,
}

impl CumulativeCounts {
    /// The span's own contribution, before any descendants
    ///
    /// Negative token counts contribute nothing.
    pub fn own(span: &Span) -> Self {
        Self {
            error_count: span.own_error_count(),
            llm_token_count_prompt: span.llm_token_count_prompt().unwrap_or(0).max(0),
            llm_token_count_completion: span.llm_token_count_completion().unwrap_or(0).max(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Per-counter saturating addition
impl Add for CumulativeCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            error_count: self.error_count.saturating_add(other.error_count),
            llm_token_count_prompt: self
                .llm_token_count_prompt
                .saturating_add(other.llm_token_count_prompt),
            llm_token_count_completion: self
                .llm_token_count_completion
                .saturating_add(other.llm_token_count_completion),
        }
    }
}

/// Row id and retrieved document count of a stored span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanTarget {
    pub id: i64,
    pub num_documents: i64,
}

/// Insert a span with its own contribution as the initial cumulative value
///
/// Returns `None` when a span with the same `span_id` already exists; the
/// stored row is left untouched.
pub async fn insert_span(
    conn: &mut SqliteConnection,
    trace_rowid: i64,
    span: &Span,
) -> Result<Option<i64>, SqliteError> {
    let own = CumulativeCounts::own(span);
    let attributes = serde_json::to_string(&span.attributes)?;
    let events = serde_json::to_string(&span.events)?;

    let id = sqlx::query_scalar(
        r#"
        INSERT INTO spans (
            span_id, trace_rowid, parent_id, name, span_kind, start_time, end_time,
            attributes, events, status_code, status_message,
            llm_token_count_prompt, llm_token_count_completion, num_documents,
            cumulative_error_count, cumulative_llm_token_count_prompt,
            cumulative_llm_token_count_completion
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(span_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&span.span_id)
    .bind(trace_rowid)
    .bind(&span.parent_id)
    .bind(&span.name)
    .bind(span.span_kind.as_str())
    .bind(datetime_to_micros(&span.start_time))
    .bind(datetime_to_micros(&span.end_time))
    .bind(attributes)
    .bind(events)
    .bind(span.status_code.as_str())
    .bind(&span.status_message)
    .bind(span.llm_token_count_prompt())
    .bind(span.llm_token_count_completion())
    .bind(span.num_documents())
    .bind(own.error_count)
    .bind(own.llm_token_count_prompt)
    .bind(own.llm_token_count_completion)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Sum of the cumulative counters of the stored direct children of `span_id`
///
/// A span that names itself as parent is not its own child. Summed in Rust
/// with saturation; SQLite's `SUM` fails on integer overflow.
pub async fn sum_children_cumulative(
    conn: &mut SqliteConnection,
    span_id: &str,
) -> Result<CumulativeCounts, SqliteError> {
    let rows = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT cumulative_error_count, cumulative_llm_token_count_prompt,
               cumulative_llm_token_count_completion
        FROM spans
        WHERE parent_id = ? AND span_id != ?
        "#,
    )
    .bind(span_id)
    .bind(span_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().fold(
        CumulativeCounts::default(),
        |sum, (error_count, llm_token_count_prompt, llm_token_count_completion)| {
            sum + CumulativeCounts {
                error_count,
                llm_token_count_prompt,
                llm_token_count_completion,
            }
        },
    ))
}

pub async fn set_cumulative(
    conn: &mut SqliteConnection,
    span_rowid: i64,
    counts: CumulativeCounts,
) -> Result<(), SqliteError> {
    sqlx::query(
        r#"
        UPDATE spans SET
            cumulative_error_count = ?,
            cumulative_llm_token_count_prompt = ?,
            cumulative_llm_token_count_completion = ?
        WHERE id = ?
        "#,
    )
    .bind(counts.error_count)
    .bind(counts.llm_token_count_prompt)
    .bind(counts.llm_token_count_completion)
    .bind(span_rowid)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Add `counts` to every stored ancestor reachable from `parent_id`
///
/// The walk stops at the first span that has not arrived yet. `UNION`
/// discards repeated rows, so a parent cycle terminates. `exclude_rowid`
/// keeps the span being inserted out of its own ancestor set. Counters
/// saturate at `i64::MAX`; `counts` is never negative.
pub async fn add_to_ancestors(
    conn: &mut SqliteConnection,
    parent_id: &str,
    exclude_rowid: i64,
    counts: CumulativeCounts,
) -> Result<u64, SqliteError> {
    let result = sqlx::query(
        r#"
        WITH RECURSIVE ancestors(id, parent_id) AS (
            SELECT id, parent_id FROM spans WHERE span_id = ?
            UNION
            SELECT s.id, s.parent_id
            FROM spans s
            JOIN ancestors a ON s.span_id = a.parent_id
        )
        UPDATE spans SET
            cumulative_error_count = CASE
                WHEN cumulative_error_count > 9223372036854775807 - ? THEN 9223372036854775807
                ELSE cumulative_error_count + ? END,
            cumulative_llm_token_count_prompt = CASE
                WHEN cumulative_llm_token_count_prompt > 9223372036854775807 - ? THEN 9223372036854775807
                ELSE cumulative_llm_token_count_prompt + ? END,
            cumulative_llm_token_count_completion = CASE
                WHEN cumulative_llm_token_count_completion > 9223372036854775807 - ? THEN 9223372036854775807
                ELSE cumulative_llm_token_count_completion + ? END
        WHERE id IN (SELECT id FROM ancestors) AND id != ?
        "#,
    )
    .bind(parent_id)
    .bind(counts.error_count)
    .bind(counts.error_count)
    .bind(counts.llm_token_count_prompt)
    .bind(counts.llm_token_count_prompt)
    .bind(counts.llm_token_count_completion)
    .bind(counts.llm_token_count_completion)
    .bind(exclude_rowid)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Stored cumulative counters of a span
pub async fn get_cumulative(
    conn: &mut SqliteConnection,
    span_id: &str,
) -> Result<Option<CumulativeCounts>, SqliteError> {
    let row = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT cumulative_error_count, cumulative_llm_token_count_prompt,
               cumulative_llm_token_count_completion
        FROM spans WHERE span_id = ?
        "#,
    )
    .bind(span_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(
        |(error_count, llm_token_count_prompt, llm_token_count_completion)| CumulativeCounts {
            error_count,
            llm_token_count_prompt,
            llm_token_count_completion,
        },
    ))
}

pub async fn get_span_target(
    conn: &mut SqliteConnection,
    span_id: &str,
) -> Result<Option<SpanTarget>, SqliteError> {
    let row = sqlx::query_as::<_, (i64, i64)>(
        "SELECT id, num_documents FROM spans WHERE span_id = ?",
    )
    .bind(span_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(|(id, num_documents)| SpanTarget { id, num_documents }))
}

/// Resolve many span ids at once; ids that have not arrived are absent
pub async fn resolve_span_targets(
    conn: &mut SqliteConnection,
    span_ids: &[String],
) -> Result<HashMap<String, SpanTarget>, SqliteError> {
    let mut resolved = HashMap::with_capacity(span_ids.len());
    for chunk in span_ids.chunks(LOOKUP_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT span_id, id, num_documents FROM spans WHERE span_id IN (");
        let mut separated = builder.separated(", ");
        for span_id in chunk {
            separated.push_bind(span_id.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<(String, i64, i64)>()
            .fetch_all(&mut *conn)
            .await?;
        for (span_id, id, num_documents) in rows {
            resolved.insert(span_id, SpanTarget { id, num_documents });
        }
    }
    Ok(resolved)
}

/// Resolve many trace ids at once; ids that have not arrived are absent
pub async fn resolve_trace_rowids(
    conn: &mut SqliteConnection,
    trace_ids: &[String],
) -> Result<HashMap<String, i64>, SqliteError> {
    let mut resolved = HashMap::with_capacity(trace_ids.len());
    for chunk in trace_ids.chunks(LOOKUP_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT trace_id, id FROM traces WHERE trace_id IN (");
        let mut separated = builder.separated(", ");
        for trace_id in chunk {
            separated.push_bind(trace_id.clone());
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(&mut *conn)
            .await?;
        resolved.extend(rows);
    }
    Ok(resolved)
}
