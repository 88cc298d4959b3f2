//! Type-safe cache key builder with versioning

use crate::core::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// invalidating all cached data on schema changes. Every aggregate is
/// scoped by project id first so a project's entries can be dropped with
/// a single prefix pattern. Free-form parts (annotation names, filter
/// fingerprints) are hex-encoded so they can never contain the `:`
/// separator.
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // Span aggregates (invalidated on span insert)
    // =========================================================================

    /// Latency quantile over a project's spans or traces
    pub fn latency_quantile(project_id: i64, scope: &str, quantile: f64, filter: &str) -> String {
        format!(
            "{}:latency:{}:{}:{}:{}",
            CACHE_KEY_VERSION,
            project_id,
            scope,
            quantile,
            hex::encode(filter)
        )
    }

    pub fn latency_quantile_pattern(project_id: i64) -> String {
        format!("{}:latency:{}:*", CACHE_KEY_VERSION, project_id)
    }

    /// Total prompt/completion token counts
    pub fn token_count(project_id: i64, filter: &str) -> String {
        format!(
            "{}:tokens:{}:{}",
            CACHE_KEY_VERSION,
            project_id,
            hex::encode(filter)
        )
    }

    pub fn token_count_pattern(project_id: i64) -> String {
        format!("{}:tokens:{}:*", CACHE_KEY_VERSION, project_id)
    }

    /// Span or trace record count
    pub fn record_count(project_id: i64, scope: &str, filter: &str) -> String {
        format!(
            "{}:records:{}:{}:{}",
            CACHE_KEY_VERSION,
            project_id,
            scope,
            hex::encode(filter)
        )
    }

    pub fn record_count_pattern(project_id: i64) -> String {
        format!("{}:records:{}:*", CACHE_KEY_VERSION, project_id)
    }

    /// Earliest start and latest end time in a project
    pub fn time_bounds(project_id: i64) -> String {
        format!("{}:bounds:{}", CACHE_KEY_VERSION, project_id)
    }

    // =========================================================================
    // Annotation aggregates (invalidated on annotation upsert)
    // =========================================================================

    /// Label/score summary for one annotation name on spans or traces
    pub fn annotation_summary(project_id: i64, kind: &str, name: &str, filter: &str) -> String {
        format!(
            "{}{}",
            Self::annotation_summary_pattern(project_id, kind, name).trim_end_matches('*'),
            hex::encode(filter)
        )
    }

    pub fn annotation_summary_pattern(project_id: i64, kind: &str, name: &str) -> String {
        format!(
            "{}:annsum:{}:{}:{}:*",
            CACHE_KEY_VERSION,
            project_id,
            kind,
            hex::encode(name)
        )
    }

    /// Retrieval-quality summary for one document evaluation name
    pub fn document_evaluation_summary(project_id: i64, name: &str, filter: &str) -> String {
        format!(
            "{}{}",
            Self::document_evaluation_summary_pattern(project_id, name).trim_end_matches('*'),
            hex::encode(filter)
        )
    }

    pub fn document_evaluation_summary_pattern(project_id: i64, name: &str) -> String {
        format!(
            "{}:docevalsum:{}:{}:*",
            CACHE_KEY_VERSION,
            project_id,
            hex::encode(name)
        )
    }
}
