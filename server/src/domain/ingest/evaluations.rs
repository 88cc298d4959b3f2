//! Strict evaluation writer
//!
//! An evaluation names a target that must already be stored. Anything that
//! does not resolve is rejected with a typed error and never retried.

use async_trait::async_trait;
use sqlx::{Connection, SqliteConnection};
use thiserror::Error;

use super::flusher::BatchWriter;
use crate::data::SqliteError;
use crate::data::sqlite::repositories::{
    AnnotationTable, NewAnnotation, get_span_target, get_trace_rowid, upsert_annotations,
};
use crate::data::types::{Evaluation, EvaluationSubject};
use crate::domain::events::DmlEvent;

#[derive(Debug, Error)]
pub enum InsertEvaluationError {
    #[error("evaluation has no subject")]
    MissingSubject,

    #[error("trace not found: {0}")]
    TraceNotFound(String),

    #[error("span not found: {0}")]
    SpanNotFound(String),

    #[error(
        "document position {position} out of range for span {span_id} with {num_documents} documents"
    )]
    DocumentPositionOutOfRange {
        span_id: String,
        position: i64,
        num_documents: i64,
    },

    #[error(transparent)]
    Database(#[from] SqliteError),
}

/// Where an accepted evaluation was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationInsertion {
    pub table: AnnotationTable,
    pub annotation_id: i64,
}

/// Validate an evaluation against the stored target and upsert it
pub async fn insert_evaluation(
    conn: &mut SqliteConnection,
    evaluation: &Evaluation,
) -> Result<EvaluationInsertion, InsertEvaluationError> {
    let subject = evaluation
        .subject
        .as_ref()
        .ok_or(InsertEvaluationError::MissingSubject)?;

    let (table, annotation) = match subject {
        EvaluationSubject::Trace { trace_id } => {
            let trace_rowid = get_trace_rowid(conn, trace_id)
                .await?
                .ok_or_else(|| InsertEvaluationError::TraceNotFound(trace_id.clone()))?;
            (
                AnnotationTable::Trace,
                NewAnnotation {
                    target_rowid: trace_rowid,
                    document_position: None,
                    fields: evaluation.result.clone(),
                },
            )
        }
        EvaluationSubject::Span { span_id } => {
            let target = get_span_target(conn, span_id)
                .await?
                .ok_or_else(|| InsertEvaluationError::SpanNotFound(span_id.clone()))?;
            (
                AnnotationTable::Span,
                NewAnnotation {
                    target_rowid: target.id,
                    document_position: None,
                    fields: evaluation.result.clone(),
                },
            )
        }
        EvaluationSubject::Document {
            span_id,
            document_position,
        } => {
            let target = get_span_target(conn, span_id)
                .await?
                .ok_or_else(|| InsertEvaluationError::SpanNotFound(span_id.clone()))?;
            if !(0..target.num_documents).contains(document_position) {
                return Err(InsertEvaluationError::DocumentPositionOutOfRange {
                    span_id: span_id.clone(),
                    position: *document_position,
                    num_documents: target.num_documents,
                });
            }
            (
                AnnotationTable::Document,
                NewAnnotation {
                    target_rowid: target.id,
                    document_position: Some(*document_position),
                    fields: evaluation.result.clone(),
                },
            )
        }
    };

    let annotation_id = upsert_annotations(conn, table, std::slice::from_ref(&annotation))
        .await?
        .into_iter()
        .next()
        .ok_or(SqliteError::Database(sqlx::Error::RowNotFound))?;

    Ok(EvaluationInsertion {
        table,
        annotation_id,
    })
}

/// Writes evaluations, each in its own savepoint
pub struct EvaluationWriter;

#[async_trait]
impl BatchWriter for EvaluationWriter {
    type Item = Evaluation;
    const NAME: &'static str = "evaluations";

    async fn write_chunk(
        &self,
        conn: &mut SqliteConnection,
        chunk: Vec<Evaluation>,
    ) -> Result<Vec<DmlEvent>, SqliteError> {
        let mut span_ids = Vec::new();
        let mut trace_ids = Vec::new();
        let mut document_ids = Vec::new();

        for evaluation in chunk {
            let mut savepoint = conn.begin().await?;
            let result = insert_evaluation(&mut *savepoint, &evaluation).await;
            match result {
                Ok(insertion) => {
                    savepoint.commit().await?;
                    match insertion.table {
                        AnnotationTable::Span => span_ids.push(insertion.annotation_id),
                        AnnotationTable::Trace => trace_ids.push(insertion.annotation_id),
                        AnnotationTable::Document => document_ids.push(insertion.annotation_id),
                    }
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    tracing::warn!(name = %evaluation.result.name, error = %e, "Rejected evaluation");
                }
            }
        }

        Ok([
            (AnnotationTable::Span, span_ids),
            (AnnotationTable::Trace, trace_ids),
            (AnnotationTable::Document, document_ids),
        ]
        .into_iter()
        .filter(|(_, ids)| !ids.is_empty())
        .map(|(table, ids)| DmlEvent::annotation(table, ids))
        .collect())
    }
}
