//! In-process cache tier.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheBackend, CacheError, CachedValue};

/// Concurrent in-process map without expiry.
///
/// Clones share the same entries. Entries live until deleted, cleared or the
/// process exits.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedValue>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        Ok(self.entries.get(key).map(|entry| Arc::clone(entry.value())))
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        _ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::outcome::ResolutionOutcome;

    #[tokio::test]
    async fn test_memory_cache_instances_are_isolated() {
        let first = MemoryCache::new();
        let second = MemoryCache::new();
        first
            .set("foo", Arc::new(ResolutionOutcome::Normalized("bar".into())), None)
            .await
            .unwrap();
        assert!(first.has("foo").await.unwrap());
        assert!(!second.has("foo").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_cache_clones_share_entries() {
        let cache = MemoryCache::new();
        let clone = cache.clone();
        cache
            .set("foo", Arc::new(ResolutionOutcome::Normalized("bar".into())), None)
            .await
            .unwrap();
        assert_eq!(clone.len(), 1);
        clone.clear().await.unwrap();
        assert!(cache.is_empty());
    }
}
