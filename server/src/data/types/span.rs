//! Decoded span value consumed by the span writer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::enums::{SpanKind, SpanStatusCode};
use crate::core::constants::{
    ATTR_LLM_TOKEN_COUNT_COMPLETION, ATTR_LLM_TOKEN_COUNT_PROMPT, ATTR_RETRIEVAL_DOCUMENTS,
    ATTR_SESSION_ID,
};
use crate::utils::json::{attribute_i64, attribute_len, attribute_string};

pub(crate) fn empty_object() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// A span event (exception, log line, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub attributes: JsonValue,
}

/// One timed unit of work in a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub span_kind: SpanKind,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub attributes: JsonValue,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    #[serde(default)]
    pub status_code: SpanStatusCode,
    #[serde(default)]
    pub status_message: String,
}

impl Span {
    /// 1 when the span itself failed
    pub fn own_error_count(&self) -> i64 {
        i64::from(self.status_code == SpanStatusCode::Error)
    }

    pub fn llm_token_count_prompt(&self) -> Option<i64> {
        attribute_i64(&self.attributes, ATTR_LLM_TOKEN_COUNT_PROMPT)
    }

    pub fn llm_token_count_completion(&self) -> Option<i64> {
        attribute_i64(&self.attributes, ATTR_LLM_TOKEN_COUNT_COMPLETION)
    }

    /// Number of retrieved documents recorded on the span
    pub fn num_documents(&self) -> i64 {
        attribute_len(&self.attributes, ATTR_RETRIEVAL_DOCUMENTS) as i64
    }

    /// Caller-supplied session identifier, if any
    pub fn session_id(&self) -> Option<String> {
        attribute_string(&self.attributes, ATTR_SESSION_ID)
    }
}
