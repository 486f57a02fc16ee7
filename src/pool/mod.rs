//! Worker process supervisor.
//!
//! The pool spawns `N` independent worker processes, polls their exit status
//! on a fixed interval while reporting store progress to an observer, and can
//! shut them down with a termination signal followed by a hard kill.
//!
//! # Process Model
//!
//! - Each worker is `program args… --worker-id worker-{n}` with stdin/stdout
//!   closed and stderr inherited, so worker logs interleave with ours
//! - Nothing but those startup arguments is shared with a worker
//! - A worker that fails to spawn or exits non-zero is recorded as failed;
//!   the others keep running
//! - Children are killed if the pool is dropped with workers still alive

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, instrument, warn};

use crate::queue::{Progress, TaskRepository};
use crate::shutdown::{is_interrupted, sleep_unless_interrupted};

/// Lower bound on pool size.
pub const MIN_WORKERS: usize = 1;

/// Upper bound on pool size.
pub const MAX_WORKERS: usize = 10;

/// Default interval between liveness/progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time workers get to exit after the termination signal.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

const REAP_INTERVAL: Duration = Duration::from_millis(50);

/// Program and leading arguments used to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments placed before `--worker-id`.
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Pool sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    workers: usize,
    /// Interval between liveness/progress polls.
    pub poll_interval: Duration,
    /// Time allowed between the termination signal and the hard kill.
    pub grace_period: Duration,
}

impl PoolConfig {
    /// Creates a config, clamping `workers` to `[1, 10]`.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.clamp(MIN_WORKERS, MAX_WORKERS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Clamped worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Worker exit accounting returned by [`WorkerPool::wait_for_completion`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Workers the pool attempted to start.
    pub total_workers: usize,
    /// Workers that exited with code 0.
    pub completed_workers: usize,
    /// Workers that failed to spawn, exited non-zero, or were killed.
    pub failed_workers: usize,
    /// Workers that never started; included in `failed_workers`.
    pub spawn_failures: usize,
    /// True when the wait ended because of an interrupt.
    pub interrupted: bool,
}

impl PoolSummary {
    /// Workers that were actually running at some point.
    #[must_use]
    pub fn started_workers(&self) -> usize {
        self.total_workers - self.spawn_failures
    }
}

#[derive(Debug)]
enum SlotState {
    Running(Child),
    Exited(ExitStatus),
    Killed,
    SpawnFailed,
}

#[derive(Debug)]
struct WorkerSlot {
    worker_id: String,
    state: SlotState,
}

impl WorkerSlot {
    fn is_running(&self) -> bool {
        matches!(self.state, SlotState::Running(_))
    }

    fn succeeded(&self) -> bool {
        matches!(&self.state, SlotState::Exited(status) if status.success())
    }

    /// Records the exit if the child has finished. Returns true when it changed state.
    fn reap(&mut self) -> bool {
        let SlotState::Running(child) = &mut self.state else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    info!(worker_id = %self.worker_id, "worker exited");
                } else {
                    warn!(worker_id = %self.worker_id, code = ?status.code(), "worker exited with failure");
                }
                self.state = SlotState::Exited(status);
                true
            }
            Ok(None) => false,
            Err(error) => {
                warn!(worker_id = %self.worker_id, error = %error, "cannot query worker status");
                false
            }
        }
    }
}

/// Stable identifier of the n-th worker (1-based).
#[must_use]
pub fn worker_id(n: usize) -> String {
    format!("worker-{n}")
}

/// Supervises a set of worker processes.
#[derive(Debug)]
pub struct WorkerPool {
    command: WorkerCommand,
    config: PoolConfig,
    slots: Vec<WorkerSlot>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(command: WorkerCommand, config: PoolConfig) -> Self {
        Self {
            command,
            config,
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Spawns the configured number of workers.
    ///
    /// A worker that cannot be spawned is logged and counted as failed; the
    /// rest still start. Calling `start` on a started pool does nothing.
    ///
    /// # Returns
    ///
    /// The number of workers actually running.
    #[instrument(skip(self), fields(workers = self.config.workers, program = %self.command.program.display()))]
    pub fn start(&mut self) -> usize {
        if !self.slots.is_empty() {
            warn!("worker pool already started");
            return self.live_workers();
        }

        for n in 1..=self.config.workers {
            let worker_id = worker_id(n);
            let spawned = Command::new(&self.command.program)
                .args(&self.command.args)
                .arg("--worker-id")
                .arg(&worker_id)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn();

            let state = match spawned {
                Ok(child) => {
                    debug!(worker_id = %worker_id, pid = ?child.id(), "worker spawned");
                    SlotState::Running(child)
                }
                Err(error) => {
                    warn!(worker_id = %worker_id, error = %error, "failed to spawn worker");
                    SlotState::SpawnFailed
                }
            };
            self.slots.push(WorkerSlot { worker_id, state });
        }

        let live = self.live_workers();
        info!(live, requested = self.config.workers, "worker pool started");
        live
    }

    /// Workers that have not exited yet.
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_running()).count()
    }

    fn reap(&mut self) {
        for slot in &mut self.slots {
            slot.reap();
        }
    }

    /// Exit accounting so far.
    #[must_use]
    pub fn summary(&self) -> PoolSummary {
        PoolSummary {
            total_workers: self.slots.len(),
            completed_workers: self.slots.iter().filter(|slot| slot.succeeded()).count(),
            failed_workers: self
                .slots
                .iter()
                .filter(|slot| !slot.is_running() && !slot.succeeded())
                .count(),
            spawn_failures: self
                .slots
                .iter()
                .filter(|slot| matches!(slot.state, SlotState::SpawnFailed))
                .count(),
            interrupted: false,
        }
    }

    /// Blocks until every worker has exited, polling on the configured interval.
    ///
    /// Each tick reads the store's aggregate progress and hands it to
    /// `on_progress`. If `interrupt` is set the pool is terminated and the
    /// summary is flagged as interrupted.
    #[instrument(skip_all)]
    pub async fn wait_for_completion<R, P>(
        &mut self,
        store: &R,
        mut on_progress: P,
        interrupt: &AtomicBool,
    ) -> PoolSummary
    where
        R: TaskRepository + ?Sized,
        P: FnMut(&Progress),
    {
        let mut interrupted = false;
        loop {
            self.reap();

            match store.progress().await {
                Ok(progress) => on_progress(&progress),
                Err(error) => warn!(error = %error, "cannot read progress"),
            }

            if self.live_workers() == 0 {
                break;
            }

            if is_interrupted(interrupt) {
                warn!("interrupt received, terminating workers");
                self.terminate().await;
                interrupted = true;
                break;
            }

            sleep_unless_interrupted(self.config.poll_interval, interrupt).await;
        }

        let summary = PoolSummary {
            interrupted,
            ..self.summary()
        };
        info!(
            total = summary.total_workers,
            completed = summary.completed_workers,
            failed = summary.failed_workers,
            interrupted,
            "all workers exited"
        );
        summary
    }

    /// Signals every live worker, waits up to the grace period, then kills stragglers.
    #[instrument(skip(self))]
    pub async fn terminate(&mut self) {
        for slot in &mut self.slots {
            if let SlotState::Running(child) = &mut slot.state {
                send_terminate(child, &slot.worker_id);
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        while self.live_workers() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(REAP_INTERVAL).await;
            self.reap();
        }

        for slot in &mut self.slots {
            if let SlotState::Running(child) = &mut slot.state {
                warn!(worker_id = %slot.worker_id, "worker ignored termination, killing");
                if let Err(error) = child.kill().await {
                    warn!(worker_id = %slot.worker_id, error = %error, "failed to kill worker");
                }
                slot.state = SlotState::Killed;
            }
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, worker_id: &str) {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return;
    };
    // SAFETY: `pid` belongs to a child we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        debug!(worker_id, pid, "sent SIGTERM");
    } else {
        warn!(worker_id, pid, error = %std::io::Error::last_os_error(), "failed to signal worker");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, worker_id: &str) {
    if let Err(error) = child.start_kill() {
        warn!(worker_id, error = %error, "failed to signal worker");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_clamps_worker_count() {
        assert_eq!(PoolConfig::new(0).workers(), 1);
        assert_eq!(PoolConfig::new(4).workers(), 4);
        assert_eq!(PoolConfig::new(50).workers(), 10);
    }

    #[test]
    fn test_worker_ids_are_one_based() {
        assert_eq!(worker_id(1), "worker-1");
        assert_eq!(worker_id(10), "worker-10");
    }

    #[test]
    fn test_worker_command_builder() {
        let command = WorkerCommand::new("/bin/harvester")
            .arg("worker")
            .args(["--root", "/data"]);
        assert_eq!(command.args, vec!["worker", "--root", "/data"]);
    }

    #[test]
    fn test_summary_before_start_is_empty() {
        let pool = WorkerPool::new(WorkerCommand::new("true"), PoolConfig::new(3));
        assert_eq!(pool.summary(), PoolSummary::default());
        assert_eq!(pool.live_workers(), 0);
    }
}
