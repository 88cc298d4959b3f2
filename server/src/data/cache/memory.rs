//! In-memory cache implementation using moka
//!
//! Entries carry their own optional TTL through a custom `Expiry`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;

use super::backend::CacheBackend;
use super::error::CacheError;
use crate::core::config::{CacheConfig, EvictionPolicy};

#[derive(Clone)]
struct CacheEntry {
    data: Vec<u8>,
    ttl: Option<Duration>,
}

/// Per-entry expiry tracking for variable TTLs
struct VariableTtlExpiry;

impl Expiry<String, CacheEntry> for VariableTtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-memory cache backed by `moka::future::Cache`
pub struct InMemoryCache {
    cache: Cache<String, CacheEntry>,
}

impl InMemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let builder = Cache::builder()
            .max_capacity(config.max_entries)
            .initial_capacity((config.max_entries as usize / 4).min(10_000));

        let builder = match config.eviction_policy {
            EvictionPolicy::TinyLfu => builder.eviction_policy(moka::policy::EvictionPolicy::tiny_lfu()),
            EvictionPolicy::Lru => builder.eviction_policy(moka::policy::EvictionPolicy::lru()),
        };

        Self {
            cache: builder.expire_after(VariableTtlExpiry).build(),
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.cache.get(key).await.map(|entry| entry.data))
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry { data: value, ttl };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.contains_key(key))
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64, CacheError> {
        let prefix = pattern.trim_end_matches('*');

        // Collect first; invalidating while iterating would skip entries
        let keys_to_delete: Vec<String> = self
            .cache
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| (*k).clone())
            .collect();

        let count = keys_to_delete.len() as u64;
        for key in keys_to_delete {
            self.cache.invalidate(&key).await;
        }
        Ok(count)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig {
            max_entries: 1000,
            eviction_policy: EvictionPolicy::TinyLfu,
        }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryCache::new(&test_config());

        cache.set("key1", b"value1".to_vec(), None).await.unwrap();
        assert_eq!(cache.get("key1").await.unwrap(), Some(b"value1".to_vec()));
        assert!(cache.exists("key1").await.unwrap());

        assert!(cache.delete("key1").await.unwrap());
        assert!(!cache.delete("key1").await.unwrap());
        assert_eq!(cache.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new(&test_config());

        cache
            .set("key1", b"value1".to_vec(), Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(cache.exists("key1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.cache.run_pending_tasks().await;

        assert_eq!(cache.get("key1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_pattern() {
        let cache = InMemoryCache::new(&test_config());

        cache.set("v1:tokens:1:a", b"a".to_vec(), None).await.unwrap();
        cache.set("v1:tokens:1:b", b"b".to_vec(), None).await.unwrap();
        cache.set("v1:tokens:12:a", b"c".to_vec(), None).await.unwrap();

        let deleted = cache.delete_pattern("v1:tokens:1:*").await.unwrap();
        assert_eq!(deleted, 2);

        assert!(!cache.exists("v1:tokens:1:a").await.unwrap());
        assert!(cache.exists("v1:tokens:12:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_lru_policy_builds() {
        let cache = InMemoryCache::new(&CacheConfig {
            max_entries: 10,
            eviction_policy: EvictionPolicy::Lru,
        });
        cache.set("k", vec![1], None).await.unwrap();
        assert_eq!(cache.backend_name(), "memory");
        assert!(cache.exists("k").await.unwrap());
    }
}
