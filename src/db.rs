//! SQLite storage for the durable cache tier.
//!
//! A [`Database`] owns the connection pool. File databases run in WAL mode
//! with a busy timeout so lookups keep going while the cache writer holds
//! the lock; the schema in `migrations/` is applied on open.
//!
//! ```no_run
//! use uri_normalizer_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Path::new("uri-cache.sqlite")).await?;
//! assert_eq!(db.journal_mode().await?, "wal");
//! db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument};

/// Pool size for file databases; SQLite serializes writers anyway.
const FILE_POOL_SIZE: u32 = 5;

/// How long a connection waits on a locked database before `SQLITE_BUSY`.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Errors opening or migrating the cache database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to connect to cache database: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("failed to migrate cache database: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Pooled SQLite connection with the cache schema applied.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the database at `path`, creating the file when missing.
    ///
    /// # Errors
    ///
    /// `DbError::Connection` when the file cannot be opened or configured,
    /// `DbError::Migration` when the schema cannot be applied.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_SIZE)
            .connect(&format!("sqlite:{}?mode=rwc", path.display()))
            .await?;

        for pragma in [
            "PRAGMA journal_mode=WAL".to_string(),
            format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"),
        ] {
            sqlx::query(&pragma).execute(&pool).await?;
        }
        Self::migrated(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// The pool holds a single connection; a second one would see a
    /// different, empty database.
    ///
    /// # Errors
    ///
    /// Same as [`Database::open`].
    #[instrument]
    pub async fn in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::migrated(pool).await
    }

    async fn migrated(pool: SqlitePool) -> Result<Self, DbError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current journal mode in lower case (`wal`, `memory`, ...).
    ///
    /// # Errors
    ///
    /// `DbError::Connection` when the pragma query fails.
    pub async fn journal_mode(&self) -> Result<String, DbError> {
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;
        Ok(mode.to_lowercase())
    }

    /// Closes the pool, checkpointing the WAL. Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Cache database closed");
    }
}
