//! DML events and the dispatcher that turns them into cache invalidations
//!
//! Writers emit one `DmlEvent` per committed change set. The dispatcher
//! forwards each event to every handler registered for its kind or for one
//! of the kind's supertypes. Handlers collect keys into deduplicating sets
//! and apply their effect once per distinct key on a fixed interval.

mod dispatcher;
mod handlers;
mod last_updated;

pub use dispatcher::DmlEventDispatcher;
pub use handlers::{
    AnnotationCacheHandler, DmlEventHandler, LastUpdatedHandler, SpanCacheHandler,
};
pub use last_updated::LastUpdatedAt;

use crate::data::sqlite::repositories::AnnotationTable;

/// Something changed in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmlEvent {
    /// Spans were inserted into these projects
    SpanInsert { project_ids: Vec<i64> },
    SpanAnnotation { ids: Vec<i64> },
    TraceAnnotation { ids: Vec<i64> },
    DocumentAnnotation { ids: Vec<i64> },
}

impl DmlEvent {
    /// Event for rows upserted into an annotation table
    pub fn annotation(table: AnnotationTable, ids: Vec<i64>) -> Self {
        match table {
            AnnotationTable::Span => Self::SpanAnnotation { ids },
            AnnotationTable::Trace => Self::TraceAnnotation { ids },
            AnnotationTable::Document => Self::DocumentAnnotation { ids },
        }
    }

    pub fn kind(&self) -> DmlEventKind {
        match self {
            Self::SpanInsert { .. } => DmlEventKind::Span,
            Self::SpanAnnotation { .. } => DmlEventKind::SpanAnnotation,
            Self::TraceAnnotation { .. } => DmlEventKind::TraceAnnotation,
            Self::DocumentAnnotation { .. } => DmlEventKind::DocumentAnnotation,
        }
    }

    /// Table the ids refer to
    pub fn table(&self) -> &'static str {
        match self {
            Self::SpanInsert { .. } => "projects",
            Self::SpanAnnotation { .. } => "span_annotations",
            Self::TraceAnnotation { .. } => "trace_annotations",
            Self::DocumentAnnotation { .. } => "document_annotations",
        }
    }

    pub fn ids(&self) -> &[i64] {
        match self {
            Self::SpanInsert { project_ids } => project_ids,
            Self::SpanAnnotation { ids }
            | Self::TraceAnnotation { ids }
            | Self::DocumentAnnotation { ids } => ids,
        }
    }
}

/// Event type hierarchy
///
/// ```text
/// Dml ─┬─ Project ── Span
///      ├─ SpanAnnotation
///      ├─ TraceAnnotation
///      └─ DocumentAnnotation
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmlEventKind {
    Dml,
    Project,
    Span,
    SpanAnnotation,
    TraceAnnotation,
    DocumentAnnotation,
}

impl DmlEventKind {
    /// Kinds that events are actually emitted with
    pub const CONCRETE: [DmlEventKind; 4] = [
        DmlEventKind::Span,
        DmlEventKind::SpanAnnotation,
        DmlEventKind::TraceAnnotation,
        DmlEventKind::DocumentAnnotation,
    ];

    pub fn supertype(&self) -> Option<DmlEventKind> {
        match self {
            Self::Dml => None,
            Self::Project => Some(Self::Dml),
            Self::Span => Some(Self::Project),
            Self::SpanAnnotation | Self::TraceAnnotation | Self::DocumentAnnotation => {
                Some(Self::Dml)
            }
        }
    }

    /// This kind followed by each of its supertypes, most specific first
    pub fn ancestry(&self) -> Vec<DmlEventKind> {
        std::iter::successors(Some(*self), DmlEventKind::supertype).collect()
    }
}
