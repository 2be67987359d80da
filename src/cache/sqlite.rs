//! Durable SQLite cache tier.
//!
//! Values are stored as JSON next to an absolute expiry in milliseconds since
//! the Unix epoch. Expired rows are purged when the cache is opened and removed
//! lazily when a lookup runs into them. A row that no longer decodes is
//! dropped and reported as a miss. Writes are serialized through a single
//! writer lock; reads go straight to the pool.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{CacheBackend, CacheError, CachedValue};
use crate::db::Database;
use crate::outcome::ResolutionOutcome;

/// Default lifetime of a durable entry (one day).
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// SQLite-backed cache tier.
#[derive(Debug)]
pub struct SqliteCache {
    db: Database,
    default_ttl: Duration,
    write_lock: Mutex<()>,
}

impl SqliteCache {
    /// Opens the cache stored at `path` and purges expired rows.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Open`] when the database cannot be opened or
    /// migrated, [`CacheError::Query`] when the purge fails.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path, default_ttl: Duration) -> Result<Self, CacheError> {
        let db = Database::open(path).await?;
        Self::from_database(db, default_ttl).await
    }

    /// Opens a private in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Open`] when the database cannot be created.
    pub async fn in_memory(default_ttl: Duration) -> Result<Self, CacheError> {
        let db = Database::in_memory().await?;
        Self::from_database(db, default_ttl).await
    }

    /// Wraps an already migrated database.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] when the startup purge fails.
    pub async fn from_database(db: Database, default_ttl: Duration) -> Result<Self, CacheError> {
        let cache = Self {
            db,
            default_ttl,
            write_lock: Mutex::new(()),
        };
        let purged = cache.purge_expired().await?;
        let journal = cache.db.journal_mode().await?;
        debug!(purged, journal = %journal, "Durable cache ready");
        Ok(cache)
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Deletes every expired row; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Query`] when the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, CacheError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM cache WHERE expires <= ?")
            .bind(now_millis())
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn delete_expired_key(&self, key: &str) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM cache WHERE key = ? AND expires <= ?")
            .bind(key)
            .bind(now_millis())
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT value, expires FROM cache WHERE key = ?")
                .bind(key)
                .fetch_optional(self.db.pool())
                .await?;

        let Some((raw, expires)) = row else {
            return Ok(None);
        };
        if expires <= now_millis() {
            debug!(key, "Expired durable cache entry removed");
            self.delete_expired_key(key).await?;
            return Ok(None);
        }

        match serde_json::from_str::<ResolutionOutcome>(&raw) {
            Ok(outcome) => Ok(Some(Arc::new(outcome))),
            Err(e) => {
                warn!(key, error = %e, "Undecodable durable cache entry removed");
                self.delete_key(key).await?;
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw =
            serde_json::to_string(value.as_ref()).map_err(|e| CacheError::serialization(key, e))?;
        let ttl_ms = i64::try_from(ttl.unwrap_or(self.default_ttl).as_millis()).unwrap_or(i64::MAX);
        let expires = now_millis().saturating_add(ttl_ms);

        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT OR REPLACE INTO cache (key, value, expires) VALUES (?, ?, ?)")
            .bind(key)
            .bind(raw)
            .bind(expires)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT count(*) FROM cache WHERE key = ? AND expires > ?")
                .bind(key)
                .bind(now_millis())
                .fetch_one(self.db.pool())
                .await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM cache WHERE key = ?")
            .bind(key)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM cache")
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn close(&self) {
        let _guard = self.write_lock.lock().await;
        self.db.close().await;
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
