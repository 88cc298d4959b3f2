//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Operations on individual keys are atomic. The return values of `delete`
/// and `exists` may be stale under concurrent access, which is acceptable
/// for memoized read-side aggregates.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache with optional TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete a key from the cache
    ///
    /// Returns `true` if the key existed before deletion.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete keys matching a trailing-glob pattern like `"v1:tokens:7:*"`
    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
