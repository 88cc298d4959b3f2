//! Line-delimited JSON records accepted by the `start` and `replay` commands

use serde::Deserialize;

use crate::data::types::{
    DocumentAnnotationPrecursor, Evaluation, Span, SpanAnnotationPrecursor,
    TraceAnnotationPrecursor,
};

fn default_project_name() -> String {
    "default".to_string()
}

/// One NDJSON line, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestRecord {
    Span {
        #[serde(default = "default_project_name")]
        project_name: String,
        #[serde(flatten)]
        span: Span,
    },
    Evaluation(Evaluation),
    SpanAnnotation(SpanAnnotationPrecursor),
    TraceAnnotation(TraceAnnotationPrecursor),
    DocumentAnnotation(DocumentAnnotationPrecursor),
}

impl IngestRecord {
    /// Parse one line; blank lines yield `Ok(None)`
    pub fn parse_line(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::EvaluationSubject;

    #[test]
    fn test_span_record_defaults_project() {
        let record = IngestRecord::parse_line(
            r#"{"type":"span","span_id":"s1","trace_id":"t1","name":"llm","start_time":"2024-01-01T00:00:00Z","end_time":"2024-01-01T00:00:01Z"}"#,
        )
        .unwrap()
        .unwrap();
        match record {
            IngestRecord::Span { project_name, span } => {
                assert_eq!(project_name, "default");
                assert_eq!(span.span_id, "s1");
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_evaluation_record() {
        let record = IngestRecord::parse_line(
            r#"{"type":"evaluation","subject":{"kind":"span","span_id":"s1"},"name":"toxicity","score":0.1}"#,
        )
        .unwrap()
        .unwrap();
        let IngestRecord::Evaluation(evaluation) = record else {
            panic!("expected evaluation");
        };
        assert_eq!(
            evaluation.subject,
            Some(EvaluationSubject::Span {
                span_id: "s1".to_string()
            })
        );
        assert_eq!(evaluation.result.score, Some(0.1));
    }

    #[test]
    fn test_annotation_records() {
        let record = IngestRecord::parse_line(
            r#"{"type":"document_annotation","span_id":"s1","document_position":0,"name":"relevance","label":"relevant"}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(record, IngestRecord::DocumentAnnotation(p) if p.document_position == 0));

        let record = IngestRecord::parse_line(
            r#"{"type":"trace_annotation","trace_id":"t1","name":"correctness"}"#,
        )
        .unwrap()
        .unwrap();
        assert!(matches!(record, IngestRecord::TraceAnnotation(p) if p.trace_id == "t1"));
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(IngestRecord::parse_line("   ").unwrap().is_none());
        assert!(IngestRecord::parse_line(r#"{"type":"unknown"}"#).is_err());
        assert!(IngestRecord::parse_line("not json").is_err());
    }
}
