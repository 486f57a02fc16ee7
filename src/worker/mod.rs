//! Worker consumer loop.
//!
//! A worker repeatedly claims the next pending task, downloads it with bounded
//! retry and records the outcome. It exits when the pipeline is finished (the
//! producer has signalled ingestion-complete and nothing is pending or in
//! progress), when too many tasks fail back to back, or when interrupted.
//!
//! # Retry Behavior
//!
//! - Each task gets up to [`RetryPolicy::max_attempts`] download attempts
//! - The n-th retry waits `base_delay × n`
//! - Errors that cannot succeed on retry (most 4xx, bad URLs, size mismatch)
//!   fail the task after the first attempt
//! - The attempt count is persisted in `retry_count` when the task fails
//!
//! Store operations go through the store's own busy-retry wrapper; if that
//! budget is exhausted the worker stops with [`WorkerError::Store`].

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadError, ItemFetcher, ItemRequest};
use crate::queue::{StoreError, Task, TaskRepository};
use crate::retry::{RetryFailure, RetryPolicy, run_with_retry};
use crate::shutdown::{is_interrupted, sleep_unless_interrupted};

/// Consecutive task failures that stop a worker.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How long an idle worker waits before polling the store again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Exit code for a finished pipeline with no failures.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when failures were recorded or the circuit breaker tripped.
pub const EXIT_FAILURES: i32 = 1;
/// Exit code for a fatal store error or bad arguments.
pub const EXIT_FATAL: i32 = 2;
/// Exit code after an interrupt signal.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Errors that stop a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The store became unusable (including busy-retry exhaustion).
    #[error("worker {worker_id}: store failure: {source}")]
    Store {
        /// Worker that hit the failure.
        worker_id: String,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl WorkerError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }
}

/// Tunables for one worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable identifier recorded as task owner.
    pub worker_id: String,
    /// Directory items are saved into.
    pub destination_dir: PathBuf,
    /// Retry policy for a single download.
    pub download_policy: RetryPolicy,
    /// Idle delay between polls when nothing is claimable.
    pub poll_interval: Duration,
    /// Consecutive failures that trip the circuit breaker.
    pub max_consecutive_failures: u32,
}

impl WorkerConfig {
    /// Creates a config with default retry, poll and breaker settings.
    pub fn new(worker_id: impl Into<String>, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_id: worker_id.into(),
            destination_dir: destination_dir.into(),
            download_policy: RetryPolicy::download(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    #[must_use]
    pub fn with_download_policy(mut self, policy: RetryPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }
}

/// Why a worker loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Ingestion is complete and nothing is left to claim.
    Finished,
    /// Too many consecutive task failures.
    CircuitOpen,
    /// An interrupt was requested.
    Interrupted,
}

/// Outcome of a worker run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    /// Worker identifier.
    pub worker_id: String,
    /// Tasks this worker completed.
    pub completed: u64,
    /// Tasks this worker marked failed.
    pub failed: u64,
    /// Why the loop ended.
    pub exit: WorkerExit,
}

impl WorkerReport {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.exit {
            WorkerExit::Finished if self.failed == 0 => EXIT_SUCCESS,
            WorkerExit::Finished | WorkerExit::CircuitOpen => EXIT_FAILURES,
            WorkerExit::Interrupted => EXIT_INTERRUPTED,
        }
    }
}

/// A worker bound to a store and an item fetcher.
#[derive(Debug)]
pub struct Worker<R, F> {
    repo: R,
    fetcher: F,
    config: WorkerConfig,
}

impl<R, F> Worker<R, F>
where
    R: TaskRepository,
    F: ItemFetcher,
{
    pub fn new(repo: R, fetcher: F, config: WorkerConfig) -> Self {
        Self {
            repo,
            fetcher,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    fn store_error(&self, source: StoreError) -> WorkerError {
        WorkerError::Store {
            worker_id: self.config.worker_id.clone(),
            source,
        }
    }

    fn report(&self, completed: u64, failed: u64, exit: WorkerExit) -> WorkerReport {
        WorkerReport {
            worker_id: self.config.worker_id.clone(),
            completed,
            failed,
            exit,
        }
    }

    /// Runs the claim/download/record loop until an exit condition holds.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Store`] if a claim, mark or progress read fails
    /// after the store's own retries.
    #[instrument(skip_all, fields(worker_id = %self.config.worker_id))]
    pub async fn run(&self, interrupt: &AtomicBool) -> Result<WorkerReport, WorkerError> {
        let worker_id = self.config.worker_id.as_str();
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut consecutive_failures = 0u32;

        info!("worker started");

        loop {
            if is_interrupted(interrupt) {
                info!(completed, failed, "worker interrupted");
                return Ok(self.report(completed, failed, WorkerExit::Interrupted));
            }

            let claimed = self
                .repo
                .claim_next(worker_id)
                .await
                .map_err(|e| self.store_error(e))?;

            let Some(task) = claimed else {
                if self
                    .repo
                    .is_pipeline_finished()
                    .await
                    .map_err(|e| self.store_error(e))?
                {
                    info!(completed, failed, "pipeline finished, worker exiting");
                    return Ok(self.report(completed, failed, WorkerExit::Finished));
                }
                debug!(
                    delay_ms = self.config.poll_interval.as_millis(),
                    "no claimable task, waiting for producer"
                );
                sleep_unless_interrupted(self.config.poll_interval, interrupt).await;
                continue;
            };

            debug!(task_id = %task.id, name = %task.name, sequence_key = task.sequence_key, "claimed task");

            match self.download(&task).await {
                Ok(path) => {
                    self.repo
                        .mark_complete(&task.id)
                        .await
                        .map_err(|e| self.store_error(e))?;
                    info!(task_id = %task.id, path = %path.display(), "task completed");
                    completed += 1;
                    consecutive_failures = 0;
                }
                Err(failure) => {
                    let attempts = failure.attempts();
                    let error = failure.into_error();
                    self.repo
                        .mark_failed(&task.id, &error.to_string(), attempts)
                        .await
                        .map_err(|e| self.store_error(e))?;
                    warn!(
                        task_id = %task.id,
                        url = %task.source_locator,
                        error = %error,
                        attempts,
                        "task failed after all attempts"
                    );
                    failed += 1;
                    consecutive_failures += 1;

                    if consecutive_failures >= self.config.max_consecutive_failures {
                        warn!(
                            consecutive_failures,
                            completed, failed, "too many consecutive failures, worker stopping"
                        );
                        return Ok(self.report(completed, failed, WorkerExit::CircuitOpen));
                    }
                }
            }
        }
    }

    async fn download(&self, task: &Task) -> Result<PathBuf, RetryFailure<DownloadError>> {
        let request = item_request(task, &self.config.destination_dir);
        run_with_retry(
            &self.config.download_policy,
            "download",
            |attempt| {
                debug!(task_id = %task.id, attempt, "attempting download");
                self.fetcher.fetch_item(&request)
            },
            DownloadError::is_retryable,
        )
        .await
    }
}

fn item_request(task: &Task, destination_dir: &Path) -> ItemRequest {
    ItemRequest {
        source_locator: task.source_locator.clone(),
        destination_dir: destination_dir.to_path_buf(),
        name: task.name.clone(),
        expected_size: task.expected_bytes(),
    }
}
