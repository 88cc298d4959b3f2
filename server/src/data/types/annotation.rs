//! Annotation and evaluation values
//!
//! `Evaluation` feeds the strict writer, which rejects unknown targets.
//! The `*Precursor` types feed the retrying queues, which wait for their
//! target to arrive.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::enums::AnnotatorKind;
use super::span::empty_object;

/// Payload shared by every annotation shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFields {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    #[serde(default)]
    pub annotator_kind: AnnotatorKind,
}

impl AnnotationFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            score: None,
            explanation: None,
            metadata: empty_object(),
            annotator_kind: AnnotatorKind::default(),
        }
    }
}

/// Target of a strict-path evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationSubject {
    Trace { trace_id: String },
    Span { span_id: String },
    Document { span_id: String, document_position: i64 },
}

/// A single evaluation result for an existing trace, span or document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub subject: Option<EvaluationSubject>,
    #[serde(flatten)]
    pub result: AnnotationFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanAnnotationPrecursor {
    pub span_id: String,
    #[serde(flatten)]
    pub annotation: AnnotationFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceAnnotationPrecursor {
    pub trace_id: String,
    #[serde(flatten)]
    pub annotation: AnnotationFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnnotationPrecursor {
    pub span_id: String,
    pub document_position: i64,
    #[serde(flatten)]
    pub annotation: AnnotationFields,
}

/// Any annotation routed through a retrying queue
#[derive(Debug, Clone, PartialEq)]
pub enum Precursor {
    Span(SpanAnnotationPrecursor),
    Trace(TraceAnnotationPrecursor),
    Document(DocumentAnnotationPrecursor),
}

impl From<SpanAnnotationPrecursor> for Precursor {
    fn from(p: SpanAnnotationPrecursor) -> Self {
        Self::Span(p)
    }
}

impl From<TraceAnnotationPrecursor> for Precursor {
    fn from(p: TraceAnnotationPrecursor) -> Self {
        Self::Trace(p)
    }
}

impl From<DocumentAnnotationPrecursor> for Precursor {
    fn from(p: DocumentAnnotationPrecursor) -> Self {
        Self::Document(p)
    }
}
