//! Durable task store shared by the coordinator and every worker process.
//!
//! This module provides `SQLite`-backed persistence for tasks moving through
//! their lifecycle (pending → `in_progress` → completed/failed) plus a small
//! key/value metadata table for pipeline-wide signals.
//!
//! # Overview
//!
//! - [`TaskStore`] - Main interface, scoped to one `(location, group key)` pair
//! - [`Task`] / [`NewTask`] - Stored and to-be-inserted rows
//! - [`TaskStatus`] - Task lifecycle states
//! - [`Progress`] - Per-status counts computed on demand
//! - [`StoreError`] - Operation error types
//!
//! Processes never share memory; the store is the only coordination point.
//! Every operation runs in a transaction and is retried on `SQLite` busy/locked
//! contention with linear backoff up to a fixed ceiling, after which
//! [`StoreError::RetryExhausted`] is returned.
//!
//! # Example
//!
//! ```ignore
//! use harvester_core::queue::{NewTask, StoreLocation, StoreOptions, TaskStore};
//!
//! let location = StoreLocation::new("/data", "cats");
//! let store = TaskStore::open(&location, &StoreOptions::default()).await?;
//! store.initialize().await?;
//! store.insert_tasks(&[NewTask::new(1, "a.jpg", "https://example.com/a.jpg", None)]).await?;
//!
//! if let Some(task) = store.claim_next("worker-1").await? {
//!     // ... download the item ...
//!     store.mark_complete(&task.id).await?;
//! }
//! ```

mod error;
mod location;
mod repository;
mod task;

pub use error::{StoreError, StoreErrorKind};
pub use location::StoreLocation;
pub use repository::TaskRepository;
pub use task::{NewTask, Progress, Task, TaskStatus, derive_task_id, now_millis};

use std::future::Future;

use tracing::{debug, info, instrument};

use crate::db::{Database, DatabaseOptions};
use crate::retry::{RetryFailure, RetryPolicy, run_with_retry};

/// Metadata keys written by the coordinator.
pub mod keys {
    /// `"true"` once every discovery unit has been processed.
    pub const INGESTION_COMPLETE: &str = "ingestion_complete";
    /// Number of discovery units this run covers.
    pub const TOTAL_UNITS: &str = "total_units";
    /// Item cardinality reported by discovery.
    pub const ITEM_COUNT: &str = "item_count";
    /// First discovery unit of the run.
    pub const START_UNIT: &str = "start_unit";
    /// Requested discovery scope, as displayed.
    pub const SCOPE: &str = "scope";
    /// Items per discovery unit the totals were computed with.
    pub const PAGE_SIZE: &str = "page_size";
    /// Epoch milliseconds when the run began.
    pub const STARTED_AT: &str = "started_at";
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Options for opening a store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Connection-level settings.
    pub database: DatabaseOptions,
    /// Retry policy for busy/locked contention.
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            database: DatabaseOptions::default(),
            retry: RetryPolicy::store_contention(),
        }
    }
}

/// Returns `Ok(())` if at least one row was affected; otherwise [`StoreError::TaskNotClaimed`].
fn check_claimed(id: &str, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::TaskNotClaimed(id.to_string()))
    } else {
        Ok(())
    }
}

/// Task store for one group key.
///
/// Cloning is cheap and shares the connection pool.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
    group_key: String,
    location: Option<StoreLocation>,
    retry: RetryPolicy,
}

impl TaskStore {
    /// Opens (creating if needed) the store at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the directory or file cannot be
    /// created, opened or migrated.
    #[instrument(skip(location, options), fields(group = %location.group_key()))]
    pub async fn open(location: &StoreLocation, options: &StoreOptions) -> Result<Self> {
        let db_path = location.db_path();
        tokio::fs::create_dir_all(location.dir())
            .await
            .map_err(|error| StoreError::Open {
                path: db_path.clone(),
                message: error.to_string(),
            })?;

        let db = Database::new(&db_path, &options.database)
            .await
            .map_err(|error| StoreError::open(&db_path, &error))?;

        debug!(path = %db_path.display(), "task store opened");

        Ok(Self {
            db,
            group_key: location.group_key().to_string(),
            location: Some(location.clone()),
            retry: options.retry.clone(),
        })
    }

    /// Opens a private in-memory store, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] if the database cannot be created.
    pub async fn open_in_memory(group_key: &str) -> Result<Self> {
        let db = Database::new_in_memory()
            .await
            .map_err(|error| StoreError::open(":memory:", &error))?;

        Ok(Self {
            db,
            group_key: group_key.to_string(),
            location: None,
            retry: RetryPolicy::store_contention(),
        })
    }

    /// The group this store is scoped to.
    #[must_use]
    pub fn group_key(&self) -> &str {
        &self.group_key
    }

    /// On-disk location, `None` for in-memory stores.
    #[must_use]
    pub fn location(&self) -> Option<&StoreLocation> {
        self.location.as_ref()
    }

    async fn with_busy_retry<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        run_with_retry(&self.retry, operation, op, StoreError::is_busy_or_locked)
            .await
            .map_err(|failure| match failure {
                RetryFailure::Fatal { error, .. } => error,
                RetryFailure::Exhausted { attempts, last } => StoreError::RetryExhausted {
                    operation,
                    attempts,
                    message: last.to_string(),
                },
            })
    }

    /// Clears every task and metadata entry of this group, for a fresh run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn initialize(&self) -> Result<()> {
        self.with_busy_retry("initialize", |_| async {
            let mut tx = self.db.pool().begin().await?;
            let tasks = sqlx::query("DELETE FROM tasks WHERE group_key = ?")
                .bind(&self.group_key)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM metadata WHERE group_key = ?")
                .bind(&self.group_key)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            debug!(removed = tasks.rows_affected(), "store initialized");
            Ok(())
        })
        .await
    }

    /// Inserts discovered items, ignoring any whose `(group, name)` is already known.
    ///
    /// The whole batch is one transaction. New rows start `pending`.
    ///
    /// # Returns
    ///
    /// The number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self, tasks), fields(group = %self.group_key, batch = tasks.len()))]
    pub async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<u64> {
        if tasks.is_empty() {
            return Ok(0);
        }
        let discovered_at = now_millis();

        self.with_busy_retry("insert_tasks", |_| async move {
            let mut tx = self.db.pool().begin().await?;
            let mut inserted = 0;
            for task in tasks {
                let id = derive_task_id(&self.group_key, task.sequence_key, &task.name, discovered_at);
                let result = sqlx::query(
                    r"INSERT OR IGNORE INTO tasks (
                        id,
                        group_key,
                        sequence_key,
                        name,
                        source_locator,
                        expected_size,
                        status
                      )
                      VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&self.group_key)
                .bind(task.sequence_key)
                .bind(&task.name)
                .bind(&task.source_locator)
                .bind(task.expected_size)
                .bind(TaskStatus::Pending.as_str())
                .execute(&mut *tx)
                .await?;
                inserted += result.rows_affected();
            }
            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }

    /// Atomically claims the lowest `(sequence_key, name)` pending task.
    ///
    /// The select and the transition to `in_progress` happen in a single
    /// `UPDATE … RETURNING` inside a write transaction, so two concurrent
    /// callers can never receive the same row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>> {
        self.with_busy_retry("claim_next", |_| self.claim_next_once(worker_id))
            .await
    }

    async fn claim_next_once(&self, worker_id: &str) -> Result<Option<Task>> {
        let mut tx = self.db.pool().begin().await?;
        let task = sqlx::query_as::<_, Task>(
            r"UPDATE tasks
              SET status = ?,
                  owner = ?,
                  started_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
              WHERE status = ?
                AND id = (
                  SELECT id FROM tasks
                  WHERE group_key = ? AND status = ?
                  ORDER BY sequence_key ASC, name ASC
                  LIMIT 1
              )
              RETURNING *",
        )
        .bind(TaskStatus::InProgress.as_str())
        .bind(worker_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(&self.group_key)
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        if let Some(task) = &task {
            debug!(task_id = %task.id, worker_id, "claimed task");
        }
        Ok(task)
    }

    /// Marks a claimed task completed and releases its owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotClaimed`] if the task is not in progress.
    #[instrument(skip(self))]
    pub async fn mark_complete(&self, id: &str) -> Result<()> {
        self.with_busy_retry("mark_complete", |_| async {
            let mut tx = self.db.pool().begin().await?;
            let result = sqlx::query(
                r"UPDATE tasks
                  SET status = ?,
                      owner = NULL,
                      completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                      last_error = NULL
                  WHERE id = ? AND group_key = ? AND status = ?",
            )
            .bind(TaskStatus::Completed.as_str())
            .bind(id)
            .bind(&self.group_key)
            .bind(TaskStatus::InProgress.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            check_claimed(id, result.rows_affected())
        })
        .await
    }

    /// Marks a claimed task failed with its last error and attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotClaimed`] if the task is not in progress.
    #[instrument(skip(self), fields(error = %error, retry_count))]
    pub async fn mark_failed(&self, id: &str, error: &str, retry_count: u32) -> Result<()> {
        self.with_busy_retry("mark_failed", |_| async {
            let mut tx = self.db.pool().begin().await?;
            let result = sqlx::query(
                r"UPDATE tasks
                  SET status = ?,
                      owner = NULL,
                      completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now'),
                      last_error = ?,
                      retry_count = ?
                  WHERE id = ? AND group_key = ? AND status = ?",
            )
            .bind(TaskStatus::Failed.as_str())
            .bind(error)
            .bind(i64::from(retry_count))
            .bind(id)
            .bind(&self.group_key)
            .bind(TaskStatus::InProgress.as_str())
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            check_claimed(id, result.rows_affected())
        })
        .await
    }

    /// Returns every in-progress task of the group to pending.
    ///
    /// This is the only crash-recovery primitive: tasks owned by a worker that
    /// died stay in progress until this is called explicitly.
    ///
    /// # Returns
    ///
    /// The number of tasks reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn reset_in_progress(&self) -> Result<u64> {
        let reset = self
            .with_busy_retry("reset_in_progress", |_| async {
                let mut tx = self.db.pool().begin().await?;
                let result = sqlx::query(
                    r"UPDATE tasks
                      SET status = ?, owner = NULL, started_at = NULL
                      WHERE group_key = ? AND status = ?",
                )
                .bind(TaskStatus::Pending.as_str())
                .bind(&self.group_key)
                .bind(TaskStatus::InProgress.as_str())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            })
            .await?;

        if reset > 0 {
            info!(reset, "recovered in-progress tasks from a previous run");
        }
        Ok(reset)
    }

    /// Counts tasks per status for the group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn progress(&self) -> Result<Progress> {
        let rows = self
            .with_busy_retry("progress", |_| async {
                let rows = sqlx::query_as::<_, (String, i64)>(
                    r"SELECT status, COUNT(*) FROM tasks
                      WHERE group_key = ?
                      GROUP BY status",
                )
                .bind(&self.group_key)
                .fetch_all(self.db.pool())
                .await?;
                Ok(rows)
            })
            .await?;

        let mut progress = Progress::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => progress.pending = count,
                Ok(TaskStatus::InProgress) => progress.in_progress = count,
                Ok(TaskStatus::Completed) => progress.completed = count,
                Ok(TaskStatus::Failed) => progress.failed = count,
                Err(_) => continue,
            }
            progress.total += count;
        }
        Ok(progress)
    }

    /// True when any task was already ingested from `sequence_key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn has_sequence(&self, sequence_key: i64) -> Result<bool> {
        self.with_busy_retry("has_sequence", |_| async {
            let (exists,): (i64,) = sqlx::query_as(
                r"SELECT EXISTS(
                    SELECT 1 FROM tasks WHERE group_key = ? AND sequence_key = ?
                  )",
            )
            .bind(&self.group_key)
            .bind(sequence_key)
            .fetch_one(self.db.pool())
            .await?;
            Ok(exists != 0)
        })
        .await
    }

    /// Writes (or overwrites) a metadata entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.with_busy_retry("set_metadata", |_| async {
            let mut tx = self.db.pool().begin().await?;
            sqlx::query(
                r"INSERT INTO metadata (group_key, key, value)
                  VALUES (?, ?, ?)
                  ON CONFLICT (group_key, key) DO UPDATE
                  SET value = excluded.value,
                      updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            )
            .bind(&self.group_key)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Reads a metadata entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        self.with_busy_retry("get_metadata", |_| async {
            let value: Option<(String,)> =
                sqlx::query_as("SELECT value FROM metadata WHERE group_key = ? AND key = ?")
                    .bind(&self.group_key)
                    .bind(key)
                    .fetch_optional(self.db.pool())
                    .await?;
            Ok(value.map(|(value,)| value))
        })
        .await
    }

    /// True once the producer has signalled that discovery is over.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    pub async fn is_ingestion_complete(&self) -> Result<bool> {
        Ok(self
            .get_metadata(keys::INGESTION_COMPLETE)
            .await?
            .is_some_and(|value| value == "true"))
    }

    /// True when ingestion is complete and nothing is pending or in progress.
    ///
    /// This is the one place "the pipeline is finished" is decided.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn is_pipeline_finished(&self) -> Result<bool> {
        if !self.is_ingestion_complete().await? {
            return Ok(false);
        }
        Ok(self.progress().await?.outstanding() == 0)
    }

    /// Gets a task by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        self.with_busy_retry("get", |_| self.get_once(id)).await
    }

    async fn get_once(&self, id: &str) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = ? AND group_key = ?")
            .bind(id)
            .bind(&self.group_key)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(task)
    }

    /// Lists tasks in a status, in claim order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] or [`StoreError::RetryExhausted`].
    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.with_busy_retry("list_by_status", |_| async {
            let tasks = sqlx::query_as::<_, Task>(
                r"SELECT * FROM tasks
                  WHERE group_key = ? AND status = ?
                  ORDER BY sequence_key ASC, name ASC",
            )
            .bind(&self.group_key)
            .bind(status.as_str())
            .fetch_all(self.db.pool())
            .await?;
            Ok(tasks)
        })
        .await
    }

    /// Releases the connection pool.
    pub async fn close(&self) {
        self.db.close().await;
    }

    /// Closes the store and removes all persisted state for the group.
    ///
    /// Calling it when the state is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the store directory cannot be removed.
    #[instrument(skip(self), fields(group = %self.group_key))]
    pub async fn delete(&self) -> Result<()> {
        self.close().await;
        if let Some(location) = &self.location {
            location.remove().await?;
        }
        info!("task store deleted");
        Ok(())
    }
}
