//! Annotation repository
//!
//! The three annotation tables share one shape and differ only in their
//! target columns, so every statement is built from an `AnnotationTable`.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::data::sqlite::SqliteError;
use crate::data::types::AnnotationFields;
use crate::utils::time::now_micros;

/// Rows per bulk upsert statement
const UPSERT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationTable {
    Span,
    Trace,
    Document,
}

impl AnnotationTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Span => "span_annotations",
            Self::Trace => "trace_annotations",
            Self::Document => "document_annotations",
        }
    }

    fn target_column(&self) -> &'static str {
        match self {
            Self::Span | Self::Document => "span_rowid",
            Self::Trace => "trace_rowid",
        }
    }

    fn conflict_columns(&self) -> &'static str {
        match self {
            Self::Span => "name, span_rowid",
            Self::Trace => "name, trace_rowid",
            Self::Document => "name, span_rowid, document_position",
        }
    }

    /// Join from an annotation row (`a`) to the owning trace (`t`)
    fn trace_join(&self) -> &'static str {
        match self {
            Self::Span | Self::Document => {
                "JOIN spans s ON s.id = a.span_rowid JOIN traces t ON t.id = s.trace_rowid"
            }
            Self::Trace => "JOIN traces t ON t.id = a.trace_rowid",
        }
    }
}

/// A resolved annotation ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub target_rowid: i64,
    /// Only set for document annotations
    pub document_position: Option<i64>,
    pub fields: AnnotationFields,
}

fn push_insert(builder: &mut QueryBuilder<'_, Sqlite>, table: AnnotationTable) {
    builder.push(format!("INSERT INTO {} ({}", table.as_str(), table.target_column()));
    if table == AnnotationTable::Document {
        builder.push(", document_position");
    }
    builder.push(
        ", name, label, score, explanation, metadata, annotator_kind, created_at, updated_at) ",
    );
}

fn push_on_conflict(builder: &mut QueryBuilder<'_, Sqlite>, table: AnnotationTable) {
    builder.push(format!(
        r#" ON CONFLICT({}) DO UPDATE SET
            label = excluded.label,
            score = excluded.score,
            explanation = excluded.explanation,
            metadata = excluded.metadata,
            annotator_kind = excluded.annotator_kind,
            updated_at = excluded.updated_at
        RETURNING id"#,
        table.conflict_columns()
    ));
}

/// Insert or replace annotations keyed by (name, target[, position])
///
/// All rows are written with one statement per chunk. Returns the ids of
/// the inserted or replaced rows.
pub async fn upsert_annotations(
    conn: &mut SqliteConnection,
    table: AnnotationTable,
    annotations: &[NewAnnotation],
) -> Result<Vec<i64>, SqliteError> {
    let now = now_micros();
    let mut ids = Vec::with_capacity(annotations.len());

    for chunk in annotations.chunks(UPSERT_CHUNK_SIZE) {
        let rows = chunk
            .iter()
            .map(|a| Ok((a, serde_json::to_string(&a.fields.metadata)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("");
        push_insert(&mut builder, table);
        builder.push_values(rows, |mut b, (annotation, metadata)| {
            b.push_bind(annotation.target_rowid);
            if table == AnnotationTable::Document {
                b.push_bind(annotation.document_position.unwrap_or_default());
            }
            b.push_bind(annotation.fields.name.clone())
                .push_bind(annotation.fields.label.clone())
                .push_bind(annotation.fields.score)
                .push_bind(annotation.fields.explanation.clone())
                .push_bind(metadata)
                .push_bind(annotation.fields.annotator_kind.as_str())
                .push_bind(now)
                .push_bind(now);
        });
        push_on_conflict(&mut builder, table);

        let chunk_ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut *conn)
            .await?;
        ids.extend(chunk_ids);
    }

    Ok(ids)
}

/// Distinct (project id, annotation name) pairs for annotation row ids
pub async fn project_names_for_annotations(
    pool: &SqlitePool,
    table: AnnotationTable,
    ids: &[i64],
) -> Result<Vec<(i64, String)>, SqliteError> {
    let mut pairs = Vec::new();
    for chunk in ids.chunks(UPSERT_CHUNK_SIZE) {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT DISTINCT t.project_id, a.name FROM {} a {} WHERE a.id IN (",
            table.as_str(),
            table.trace_join()
        ));
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build_query_as::<(i64, String)>()
            .fetch_all(pool)
            .await?;
        pairs.extend(rows);
    }
    pairs.sort();
    pairs.dedup();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sqlite::SqliteService;
    use crate::data::sqlite::repositories::{get_or_create_project, insert_span, upsert_trace};
    use crate::data::types::Span;
    use serde_json::json;

    async fn seed(conn: &mut SqliteConnection) -> (i64, i64, i64) {
        let project_id = get_or_create_project(conn, "default").await.unwrap();
        let trace = upsert_trace(conn, project_id, "t1", 0, 1).await.unwrap();
        let span: Span = serde_json::from_value(json!({
            "span_id": "s1",
            "trace_id": "t1",
            "name": "retrieve",
            "start_time": "2024-01-01T00:00:00Z",
            "end_time": "2024-01-01T00:00:01Z",
        }))
        .unwrap();
        let span_rowid = insert_span(conn, trace.id, &span).await.unwrap().unwrap();
        (project_id, trace.id, span_rowid)
    }

    fn annotation(target_rowid: i64, name: &str, label: &str) -> NewAnnotation {
        let mut fields = AnnotationFields::named(name);
        fields.label = Some(label.to_string());
        fields.score = Some(1.0);
        NewAnnotation {
            target_rowid,
            document_position: None,
            fields,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_on_name() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let (_, _, span_rowid) = seed(&mut conn).await;

        let first = upsert_annotations(
            &mut conn,
            AnnotationTable::Span,
            &[annotation(span_rowid, "quality", "bad")],
        )
        .await
        .unwrap();
        let second = upsert_annotations(
            &mut conn,
            AnnotationTable::Span,
            &[annotation(span_rowid, "quality", "good")],
        )
        .await
        .unwrap();
        assert_eq!(first, second);

        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            "SELECT name, label FROM span_annotations",
        )
        .fetch_all(&mut *conn)
        .await
        .unwrap();
        assert_eq!(rows, vec![("quality".to_string(), Some("good".to_string()))]);
    }

    #[tokio::test]
    async fn test_document_positions_are_distinct_rows() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let (_, _, span_rowid) = seed(&mut conn).await;

        let rows: Vec<NewAnnotation> = (0..3)
            .map(|position| NewAnnotation {
                document_position: Some(position),
                ..annotation(span_rowid, "relevance", "relevant")
            })
            .collect();
        let ids = upsert_annotations(&mut conn, AnnotationTable::Document, &rows)
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_bulk_failure_is_atomic_per_statement() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();
        let (_, trace_rowid, _) = seed(&mut conn).await;

        let rows = vec![
            annotation(trace_rowid, "ok", "x"),
            annotation(trace_rowid, "", "empty name violates CHECK"),
        ];
        assert!(
            upsert_annotations(&mut conn, AnnotationTable::Trace, &rows)
                .await
                .is_err()
        );

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM trace_annotations")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_project_names_for_annotations() {
        let db = SqliteService::open_in_memory().await.unwrap();
        let (project_id, trace_rowid, span_rowid) = {
            let mut conn = db.pool().acquire().await.unwrap();
            seed(&mut conn).await
        };

        let mut conn = db.pool().acquire().await.unwrap();
        let span_ids = upsert_annotations(
            &mut conn,
            AnnotationTable::Span,
            &[
                annotation(span_rowid, "quality", "good"),
                annotation(span_rowid, "tone", "calm"),
            ],
        )
        .await
        .unwrap();
        let trace_ids = upsert_annotations(
            &mut conn,
            AnnotationTable::Trace,
            &[annotation(trace_rowid, "quality", "good")],
        )
        .await
        .unwrap();
        drop(conn);

        let pairs = project_names_for_annotations(db.pool(), AnnotationTable::Span, &span_ids)
            .await
            .unwrap();
        assert_eq!(
            pairs,
            vec![(project_id, "quality".to_string()), (project_id, "tone".to_string())]
        );

        let pairs = project_names_for_annotations(db.pool(), AnnotationTable::Trace, &trace_ids)
            .await
            .unwrap();
        assert_eq!(pairs, vec![(project_id, "quality".to_string())]);
    }
}
