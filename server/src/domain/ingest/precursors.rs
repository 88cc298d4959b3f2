//! Queue bindings for span, trace and document annotations

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::SqliteConnection;

use super::queue::AnnotationPrecursor;
use crate::data::SqliteError;
use crate::data::sqlite::repositories::{
    AnnotationTable, NewAnnotation, SpanTarget, resolve_span_targets, resolve_trace_rowids,
};
use crate::data::types::{
    DocumentAnnotationPrecursor, SpanAnnotationPrecursor, TraceAnnotationPrecursor,
};

#[async_trait]
impl AnnotationPrecursor for SpanAnnotationPrecursor {
    type Target = SpanTarget;
    const TABLE: AnnotationTable = AnnotationTable::Span;

    fn target_id(&self) -> &str {
        &self.span_id
    }

    fn name(&self) -> &str {
        &self.annotation.name
    }

    async fn resolve_targets(
        conn: &mut SqliteConnection,
        target_ids: &[String],
    ) -> Result<HashMap<String, SpanTarget>, SqliteError> {
        resolve_span_targets(conn, target_ids).await
    }

    fn to_row(&self, target: SpanTarget) -> Result<NewAnnotation, String> {
        Ok(NewAnnotation {
            target_rowid: target.id,
            document_position: None,
            fields: self.annotation.clone(),
        })
    }
}

#[async_trait]
impl AnnotationPrecursor for TraceAnnotationPrecursor {
    type Target = i64;
    const TABLE: AnnotationTable = AnnotationTable::Trace;

    fn target_id(&self) -> &str {
        &self.trace_id
    }

    fn name(&self) -> &str {
        &self.annotation.name
    }

    async fn resolve_targets(
        conn: &mut SqliteConnection,
        target_ids: &[String],
    ) -> Result<HashMap<String, i64>, SqliteError> {
        resolve_trace_rowids(conn, target_ids).await
    }

    fn to_row(&self, trace_rowid: i64) -> Result<NewAnnotation, String> {
        Ok(NewAnnotation {
            target_rowid: trace_rowid,
            document_position: None,
            fields: self.annotation.clone(),
        })
    }
}

#[async_trait]
impl AnnotationPrecursor for DocumentAnnotationPrecursor {
    type Target = SpanTarget;
    const TABLE: AnnotationTable = AnnotationTable::Document;

    fn target_id(&self) -> &str {
        &self.span_id
    }

    fn name(&self) -> &str {
        &self.annotation.name
    }

    async fn resolve_targets(
        conn: &mut SqliteConnection,
        target_ids: &[String],
    ) -> Result<HashMap<String, SpanTarget>, SqliteError> {
        resolve_span_targets(conn, target_ids).await
    }

    /// A stored span's document count never changes, so an out-of-range
    /// position is final.
    fn to_row(&self, target: SpanTarget) -> Result<NewAnnotation, String> {
        if !(0..target.num_documents).contains(&self.document_position) {
            return Err(format!(
                "document position {} out of range for span with {} documents",
                self.document_position, target.num_documents
            ));
        }
        Ok(NewAnnotation {
            target_rowid: target.id,
            document_position: Some(self.document_position),
            fields: self.annotation.clone(),
        })
    }
}
