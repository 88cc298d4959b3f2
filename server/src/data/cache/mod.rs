//! Cache module
//!
//! Memoizes read-side aggregates (latency quantiles, token counts, record
//! counts, annotation summaries). The DML event handlers invalidate entries
//! when the ingestion path changes the rows behind them.

mod backend;
mod error;
mod key;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;

use memory::InMemoryCache;

use crate::core::config::CacheConfig;

/// Cache service providing typed access to cache backend
///
/// Values are stored as MessagePack bytes.
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .finish()
    }
}

impl CacheService {
    /// Create an in-memory cache service from configuration
    pub fn new(config: &CacheConfig) -> Self {
        tracing::debug!(
            max_entries = config.max_entries,
            eviction_policy = %config.eviction_policy,
            "Initializing in-memory cache"
        );
        Self {
            backend: Arc::new(InMemoryCache::new(config)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Get a typed value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.backend.get(key).await? {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a typed value in cache
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes =
            rmp_serde::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.backend.set(key, bytes, ttl).await
    }

    /// Delete a key, logging instead of propagating failures
    pub async fn invalidate_key(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Cache invalidation failed");
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }

    /// Invalidate keys matching a pattern, logging instead of propagating failures
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        match self.backend.delete_pattern(pattern).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::EvictionPolicy;

    fn test_config() -> CacheConfig {
        CacheConfig {
            max_entries: 1000,
            eviction_policy: EvictionPolicy::TinyLfu,
        }
    }

    #[tokio::test]
    async fn test_typed_get_set() {
        let service = CacheService::new(&test_config());
        assert_eq!(service.backend_name(), "memory");

        let key = CacheKey::token_count(1, "");
        service.set(&key, &(120_i64, 45_i64), None).await.unwrap();
        let fetched: Option<(i64, i64)> = service.get(&key).await.unwrap();
        assert_eq!(fetched, Some((120, 45)));
    }

    #[tokio::test]
    async fn test_invalidate_pattern_and_key() {
        let service = CacheService::new(&test_config());

        service.set(&CacheKey::token_count(1, "a"), &1, None).await.unwrap();
        service.set(&CacheKey::token_count(1, "b"), &2, None).await.unwrap();
        service.set(&CacheKey::time_bounds(1), &(0, 10), None).await.unwrap();

        assert_eq!(service.invalidate(&CacheKey::token_count_pattern(1)).await, 2);
        assert!(service.exists(&CacheKey::time_bounds(1)).await.unwrap());

        service.invalidate_key(&CacheKey::time_bounds(1)).await;
        assert!(!service.exists(&CacheKey::time_bounds(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_wrong_type_is_serialization_error() {
        let service = CacheService::new(&test_config());
        service.set("k", &"text", None).await.unwrap();
        let result: Result<Option<i64>, _> = service.get("k").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }
}
