//! Database connection and schema management.
//!
//! This module provides `SQLite` connectivity shared by the coordinator and
//! every worker process:
//! - Connection pool management
//! - WAL mode so readers never block the single writer
//! - A per-connection busy timeout before `SQLITE_BUSY` surfaces
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::db::{Database, DatabaseOptions};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("tasks.db"), &DatabaseOptions::default()).await?;
//! // Use db for queries...
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for `SQLite` since it uses file-level locking and every process
/// has its own pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 2;

/// Default `SQLite` busy timeout in milliseconds.
/// Connections wait this long inside `SQLite` before returning `SQLITE_BUSY`.
const DEFAULT_BUSY_TIMEOUT_MS: u32 = 2000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Tunables for opening a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Pool size per process.
    pub max_connections: u32,
    /// `PRAGMA busy_timeout` in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Database connection wrapper with connection pool.
///
/// Handles `SQLite` connection pooling, WAL mode configuration,
/// and automatic migration execution.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode with `synchronous=NORMAL`, which survives a killed process
    /// 3. Apply the configured busy timeout to every pooled connection
    /// 4. Run any pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path, options: &DatabaseOptions) -> Result<Self, DbError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)));

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections.max(1))
            .connect_with(connect_options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the single pooled
    /// connection. WAL mode is not enabled for in-memory databases as it
    /// provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Gracefully closes all connections in the pool.
    ///
    /// After calling this method the Database instance should not be used.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_migrations_create_tasks_table() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO tasks (id, group_key, sequence_key, name, source_locator)
             VALUES ('a', 'g', 1, 'file.bin', 'https://example.com/file.bin')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "tasks table should exist after migration");
    }

    #[tokio::test]
    async fn test_database_tasks_reject_unknown_status() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO tasks (id, group_key, sequence_key, name, source_locator, status)
             VALUES ('a', 'g', 1, 'file.bin', 'loc', 'exploded')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "invalid status should be rejected by CHECK");
    }

    #[tokio::test]
    async fn test_database_tasks_reject_owner_without_in_progress() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO tasks (id, group_key, sequence_key, name, source_locator, status, owner)
             VALUES ('a', 'g', 1, 'file.bin', 'loc', 'pending', 'worker-1')",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "owner must be NULL unless in_progress");
    }

    #[tokio::test]
    async fn test_database_with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path, &DatabaseOptions::default())
            .await
            .unwrap();

        assert!(db.is_wal_enabled().await.unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_database_reopen_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let first = Database::new(&db_path, &DatabaseOptions::default())
            .await
            .unwrap();
        let second = Database::new(&db_path, &DatabaseOptions::default()).await;

        assert!(second.is_ok(), "second open should find migrations applied");
        first.close().await;
    }
}
