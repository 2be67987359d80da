//! Error types for cache tiers.

use thiserror::Error;

use crate::db::DbError;

/// Errors raised by a cache tier.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The durable store could not be opened.
    #[error("failed to open cache database: {0}")]
    Open(#[from] DbError),

    /// A cache query failed.
    #[error("cache query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored value could not be encoded or decoded.
    #[error("cache value (de)serialization failed for '{key}': {source}")]
    Serialization {
        /// The affected key
        key: String,
        /// The underlying serde error
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    /// Creates a `Serialization` error.
    pub fn serialization(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            key: key.into(),
            source,
        }
    }
}
