//! Value types shared by the ingestion path and the SQLite store

mod annotation;
mod enums;
mod span;

pub use annotation::{
    AnnotationFields, Precursor, DocumentAnnotationPrecursor, Evaluation,
    EvaluationSubject, SpanAnnotationPrecursor, TraceAnnotationPrecursor,
};
pub use enums::{AnnotatorKind, SpanKind, SpanStatusCode};
pub use span::{Span, SpanEvent};
