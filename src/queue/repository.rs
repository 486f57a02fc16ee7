//! Repository seam for the operations a worker performs against the store.
//!
//! Workers depend on this trait instead of [`TaskStore`] so the worker loop can
//! be driven against scripted stores in tests.

use async_trait::async_trait;

use super::{Progress, Result, Task, TaskStore};

/// Data-access contract for the worker loop.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Claims the next pending task for `worker_id`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>>;

    /// Marks a claimed task completed.
    async fn mark_complete(&self, id: &str) -> Result<()>;

    /// Marks a claimed task failed with message and attempt count.
    async fn mark_failed(&self, id: &str, error: &str, retry_count: u32) -> Result<()>;

    /// Returns per-status counts.
    async fn progress(&self) -> Result<Progress>;

    /// True when ingestion is complete and nothing is outstanding.
    async fn is_pipeline_finished(&self) -> Result<bool>;
}

#[async_trait]
impl TaskRepository for TaskStore {
    async fn claim_next(&self, worker_id: &str) -> Result<Option<Task>> {
        TaskStore::claim_next(self, worker_id).await
    }

    async fn mark_complete(&self, id: &str) -> Result<()> {
        TaskStore::mark_complete(self, id).await
    }

    async fn mark_failed(&self, id: &str, error: &str, retry_count: u32) -> Result<()> {
        TaskStore::mark_failed(self, id, error, retry_count).await
    }

    async fn progress(&self) -> Result<Progress> {
        TaskStore::progress(self).await
    }

    async fn is_pipeline_finished(&self) -> Result<bool> {
        TaskStore::is_pipeline_finished(self).await
    }
}
