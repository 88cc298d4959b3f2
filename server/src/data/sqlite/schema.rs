//! SQLite schema definitions
//!
//! Timestamps are INTEGER microseconds since the Unix epoch. JSON payloads are TEXT.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- =============================================================================
-- 1. Projects (created lazily by name on first span)
-- =============================================================================
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE CHECK(length(name) >= 1),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- =============================================================================
-- 2. Project sessions (caller-defined groups of traces)
-- =============================================================================
CREATE TABLE IF NOT EXISTS project_sessions (
    id INTEGER PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_project_sessions_project ON project_sessions(project_id);

-- =============================================================================
-- 3. Traces (bounds are the running min/max over their spans)
-- =============================================================================
CREATE TABLE IF NOT EXISTS traces (
    id INTEGER PRIMARY KEY,
    trace_id TEXT NOT NULL UNIQUE,
    project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    project_session_id INTEGER REFERENCES project_sessions(id) ON DELETE SET NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_traces_project ON traces(project_id);
CREATE INDEX IF NOT EXISTS idx_traces_session ON traces(project_session_id);

-- =============================================================================
-- 4. Spans (cumulative_* = own value + every descendant already stored)
-- =============================================================================
CREATE TABLE IF NOT EXISTS spans (
    id INTEGER PRIMARY KEY,
    span_id TEXT NOT NULL UNIQUE,
    trace_rowid INTEGER NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    parent_id TEXT,
    name TEXT NOT NULL,
    span_kind TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    attributes TEXT NOT NULL DEFAULT '{}',
    events TEXT NOT NULL DEFAULT '[]',
    status_code TEXT NOT NULL DEFAULT 'UNSET',
    status_message TEXT NOT NULL DEFAULT '',
    llm_token_count_prompt INTEGER,
    llm_token_count_completion INTEGER,
    num_documents INTEGER NOT NULL DEFAULT 0,
    cumulative_error_count INTEGER NOT NULL DEFAULT 0,
    cumulative_llm_token_count_prompt INTEGER NOT NULL DEFAULT 0,
    cumulative_llm_token_count_completion INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_spans_trace ON spans(trace_rowid);
CREATE INDEX IF NOT EXISTS idx_spans_parent ON spans(parent_id);

-- =============================================================================
-- 5. Annotations (one row per name and target)
-- =============================================================================
CREATE TABLE IF NOT EXISTS span_annotations (
    id INTEGER PRIMARY KEY,
    span_rowid INTEGER NOT NULL REFERENCES spans(id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK(length(name) >= 1),
    label TEXT,
    score REAL,
    explanation TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    annotator_kind TEXT NOT NULL CHECK(annotator_kind IN ('LLM', 'HUMAN', 'CODE')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(name, span_rowid)
);

CREATE INDEX IF NOT EXISTS idx_span_annotations_span ON span_annotations(span_rowid);

CREATE TABLE IF NOT EXISTS trace_annotations (
    id INTEGER PRIMARY KEY,
    trace_rowid INTEGER NOT NULL REFERENCES traces(id) ON DELETE CASCADE,
    name TEXT NOT NULL CHECK(length(name) >= 1),
    label TEXT,
    score REAL,
    explanation TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    annotator_kind TEXT NOT NULL CHECK(annotator_kind IN ('LLM', 'HUMAN', 'CODE')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(name, trace_rowid)
);

CREATE INDEX IF NOT EXISTS idx_trace_annotations_trace ON trace_annotations(trace_rowid);

CREATE TABLE IF NOT EXISTS document_annotations (
    id INTEGER PRIMARY KEY,
    span_rowid INTEGER NOT NULL REFERENCES spans(id) ON DELETE CASCADE,
    document_position INTEGER NOT NULL CHECK(document_position >= 0),
    name TEXT NOT NULL CHECK(length(name) >= 1),
    label TEXT,
    score REAL,
    explanation TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    annotator_kind TEXT NOT NULL CHECK(annotator_kind IN ('LLM', 'HUMAN', 'CODE')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(name, span_rowid, document_position)
);

CREATE INDEX IF NOT EXISTS idx_document_annotations_span ON document_annotations(span_rowid);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::assertions_on_constants)]
    fn test_schema_version_is_positive() {
        assert!(SCHEMA_VERSION > 0);
    }

    #[test]
    fn test_schema_contains_required_tables() {
        let required_tables = [
            "schema_version",
            "schema_migrations",
            "projects",
            "project_sessions",
            "traces",
            "spans",
            "span_annotations",
            "trace_annotations",
            "document_annotations",
        ];

        for table in required_tables {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {}", table)),
                "Schema missing table: {}",
                table
            );
        }
    }

    #[test]
    fn test_annotation_tables_unique_per_target() {
        assert!(SCHEMA.contains("UNIQUE(name, span_rowid)"));
        assert!(SCHEMA.contains("UNIQUE(name, trace_rowid)"));
        assert!(SCHEMA.contains("UNIQUE(name, span_rowid, document_position)"));
    }
}
