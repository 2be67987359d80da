//! Memoization of normalize/resolve/fetch outcomes.
//!
//! # Architecture
//!
//! - [`CacheBackend`] - the key/value contract every tier implements
//! - [`MemoryCache`] - in-process tier, no TTL, shared values
//! - [`SqliteCache`] - durable tier with TTL and lazy expiry
//! - [`ResultCache`] - read-through/write-through composition of a front
//!   tier (memory by default) and an optional durable tier
//!
//! Keys are namespaced by operation, see [`CacheKey`].

mod error;
mod memory;
mod sqlite;

pub use error::CacheError;
pub use memory::MemoryCache;
pub use sqlite::{DEFAULT_TTL, SqliteCache};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::outcome::ResolutionOutcome;

/// A cached value. The in-process tier hands out clones of the same `Arc`.
pub type CachedValue = Arc<ResolutionOutcome>;

/// Operation namespace of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Normalize,
    Resolve,
    Fetch,
}

impl CacheKey {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Normalize => "n:",
            Self::Resolve => "r:",
            Self::Fetch => "f:",
        }
    }

    /// The full key for `uri`.
    #[must_use]
    pub fn key(self, uri: &str) -> String {
        format!("{}{uri}", self.prefix())
    }
}

/// Key/value contract shared by all cache tiers.
///
/// # Object Safety
///
/// Uses `async_trait` so tiers can be stored as `Box<dyn CacheBackend>`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the value for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError>;

    /// Stores `value` under `key`. Tiers without expiry ignore `ttl`; tiers
    /// with expiry use their default when `ttl` is `None`.
    async fn set(&self, key: &str, value: CachedValue, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Removes `key`; returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Releases resources held by the tier. Lookups after `close` may fail.
    async fn close(&self) {}

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<CachedValue>>, CacheError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set_many(
        &self,
        entries: &[(String, CachedValue)],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        for (key, value) in entries {
            self.set(key, Arc::clone(value), ttl).await?;
        }
        Ok(())
    }

    /// Removes every key; returns how many entries were removed.
    async fn delete_many(&self, keys: &[&str]) -> Result<usize, CacheError> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Two-tier result cache.
///
/// Lookups hit the front tier first and fall back to the durable tier,
/// copying durable hits into the front tier. Writes go to both.
pub struct ResultCache {
    front: Box<dyn CacheBackend>,
    durable: Option<Box<dyn CacheBackend>>,
    ttl: Option<Duration>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("durable", &self.durable.is_some())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl ResultCache {
    /// A cache with only the in-process tier.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            front: Box::new(MemoryCache::new()),
            durable: None,
            ttl: None,
        }
    }

    /// An in-process tier backed by `durable`.
    #[must_use]
    pub fn with_durable(durable: impl CacheBackend + 'static) -> Self {
        Self {
            durable: Some(Box::new(durable)),
            ..Self::in_memory()
        }
    }

    /// Replaces the front tier.
    #[must_use]
    pub fn with_front(mut self, front: impl CacheBackend + 'static) -> Self {
        self.front = Box::new(front);
        self
    }

    /// TTL passed to the durable tier on every write.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    #[must_use]
    pub fn has_durable_tier(&self) -> bool {
        self.durable.is_some()
    }

    /// Stores `value` under every distinct key in `keys`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CacheError`] raised by a tier.
    #[instrument(skip(self, keys, value), fields(count = keys.len()))]
    pub async fn store_aliases(&self, keys: &[String], value: CachedValue) -> Result<(), CacheError> {
        let mut seen: Vec<&str> = Vec::with_capacity(keys.len());
        for key in keys {
            if seen.contains(&key.as_str()) {
                continue;
            }
            seen.push(key);
            self.set(key, Arc::clone(&value), None).await?;
        }
        debug!(stored = seen.len(), "Cached outcome");
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for ResultCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        if let Some(value) = self.front.get(key).await? {
            return Ok(Some(value));
        }
        let Some(durable) = &self.durable else {
            return Ok(None);
        };
        let Some(value) = durable.get(key).await? else {
            return Ok(None);
        };
        debug!(key, "Durable cache hit promoted to memory");
        self.front.set(key, Arc::clone(&value), None).await?;
        Ok(Some(value))
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.front.set(key, Arc::clone(&value), None).await?;
        if let Some(durable) = &self.durable {
            durable.set(key, value, ttl.or(self.ttl)).await?;
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        if self.front.has(key).await? {
            return Ok(true);
        }
        match &self.durable {
            Some(durable) => durable.has(key).await,
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let front = self.front.delete(key).await?;
        let durable = match &self.durable {
            Some(durable) => durable.delete(key).await?,
            None => false,
        };
        Ok(front || durable)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.front.clear().await?;
        if let Some(durable) = &self.durable {
            durable.clear().await?;
        }
        Ok(())
    }

    async fn close(&self) {
        self.front.close().await;
        if let Some(durable) = &self.durable {
            durable.close().await;
        }
    }
}
