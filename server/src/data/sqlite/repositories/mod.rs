//! SQLite repositories
//!
//! Write helpers take `&mut SqliteConnection` so callers decide the
//! transaction or savepoint they run in.

pub mod annotations;
pub mod projects;
pub mod spans;
pub mod traces;

pub use annotations::{
    AnnotationTable, NewAnnotation, project_names_for_annotations, upsert_annotations,
};
pub use projects::get_or_create_project;
pub use spans::{
    CumulativeCounts, SpanTarget, add_to_ancestors, get_cumulative, get_span_target, insert_span,
    resolve_span_targets, resolve_trace_rowids, set_cumulative, sum_children_cumulative,
};
pub use traces::{
    SessionRow, TraceRow, get_session, get_trace, get_trace_rowid, link_trace_to_session,
    upsert_session, upsert_trace, widen_session,
};
