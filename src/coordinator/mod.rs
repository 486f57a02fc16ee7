//! Producer side of the pipeline.
//!
//! The [`Coordinator`] owns the task store for one group. A run goes through
//! these phases, each logged as it is entered:
//!
//! ```text
//! Init → ResumeCheck → {Aborted | Discovering} → PoolStarted → Producing
//!      → IngestionSignaled → AwaitingWorkers → Summarized
//!      → {CacheDeleted | CachePreserved} → Done
//! ```
//!
//! Workers start before production so they drain the queue while units are
//! still being discovered. The ingestion-complete flag written after the last
//! unit is what tells them an empty queue means "done" rather than "wait".
//!
//! Store-open and discovery failures abort the run; a failing unit is logged
//! and skipped. The store handle is closed on every exit path.

mod policy;
mod scope;

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

pub use policy::{CachePolicy, NamingPolicy, ResumeDecider, ResumeDecision};
pub use scope::{DEFAULT_PAGE_SIZE, DiscoveryScope, discovered_units};

use crate::catalog::{Catalog, DiscoveryError};
use crate::pool::{PoolConfig, WorkerCommand, WorkerPool};
use crate::queue::{
    NewTask, Progress, StoreError, StoreLocation, StoreOptions, TaskStore, keys, now_millis,
};
use crate::shutdown::{is_interrupted, sleep_unless_interrupted};

/// Default pause between two discovery unit fetches.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(1000);

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The store could not be opened or became unusable.
    #[error("task store failure: {0}")]
    Store(#[from] StoreError),

    /// The discovery fetch failed.
    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The configuration cannot describe a run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Run phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    ResumeCheck,
    Aborted,
    Discovering,
    PoolStarted,
    Producing,
    IngestionSignaled,
    AwaitingWorkers,
    Summarized,
    CacheDeleted,
    CachePreserved,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Init => "init",
            Self::ResumeCheck => "resume_check",
            Self::Aborted => "aborted",
            Self::Discovering => "discovering",
            Self::PoolStarted => "pool_started",
            Self::Producing => "producing",
            Self::IngestionSignaled => "ingestion_signaled",
            Self::AwaitingWorkers => "awaiting_workers",
            Self::Summarized => "summarized",
            Self::CacheDeleted => "cache_deleted",
            Self::CachePreserved => "cache_preserved",
            Self::Done => "done",
        };
        write!(f, "{label}")
    }
}

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Root under which `cache/{group}/{group}.db` lives.
    pub root_dir: PathBuf,
    /// Logical run identifier.
    pub group_key: String,
    /// Catalog locator handed to discovery.
    pub locator: String,
    /// Units to cover.
    pub scope: DiscoveryScope,
    /// Requested worker count, clamped to `[1, 10]` by the pool.
    pub workers: usize,
    /// Discard any previous state without asking.
    pub force_fresh: bool,
    /// Verbosity forwarded to workers; above zero, per-unit progress is logged at info.
    pub verbose: u8,
    /// Task naming.
    pub naming: NamingPolicy,
    /// Store retention after the run.
    pub cache: CachePolicy,
    /// Items per discovery unit.
    pub page_size: u64,
    /// Pause between unit fetches.
    pub rate_limit: Duration,
    /// Pool poll interval and grace period.
    pub pool: PoolConfig,
    /// Store connection and busy-retry settings.
    pub store: StoreOptions,
}

impl CoordinatorConfig {
    /// Creates a config with defaults for everything but identity and scope.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        group_key: impl Into<String>,
        locator: impl Into<String>,
        scope: DiscoveryScope,
    ) -> Self {
        Self {
            root_dir: root_dir.into(),
            group_key: group_key.into(),
            locator: locator.into(),
            scope,
            workers: 3,
            force_fresh: false,
            verbose: 0,
            naming: NamingPolicy::default(),
            cache: CachePolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            pool: PoolConfig::new(3),
            store: StoreOptions::default(),
        }
    }

    /// Store location for this run.
    #[must_use]
    pub fn location(&self) -> StoreLocation {
        StoreLocation::new(&self.root_dir, &self.group_key)
    }

    fn validate(&self) -> Result<(), CoordinatorError> {
        if self.group_key.trim().is_empty() {
            return Err(CoordinatorError::InvalidConfig(
                "group key must not be empty".to_string(),
            ));
        }
        self.scope.validate().map_err(CoordinatorError::InvalidConfig)
    }
}

/// Final record of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub total_units: u64,
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub duration_ms: u64,
    /// Workers that actually started.
    pub workers_used: usize,
    pub interrupted: bool,
    pub aborted: bool,
    pub cache_deleted: bool,
}

/// What the discovery phase settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UnitPlan {
    start_unit: i64,
    total_units: u64,
    item_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    Fresh,
    Resume,
    Abort,
}

/// Observer invoked with store progress on every pool tick.
pub type ProgressObserver = Box<dyn FnMut(&Progress) + Send>;

/// Producer for one group.
pub struct Coordinator<C, D> {
    config: CoordinatorConfig,
    catalog: C,
    decider: D,
    worker_command: WorkerCommand,
    observer: Option<ProgressObserver>,
    phase: Phase,
}

impl<C, D> fmt::Debug for Coordinator<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("worker_command", &self.worker_command)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl<C, D> Coordinator<C, D>
where
    C: Catalog,
    D: ResumeDecider,
{
    /// `worker_command` launches one worker; the pool appends `--worker-id`.
    pub fn new(
        config: CoordinatorConfig,
        catalog: C,
        decider: D,
        worker_command: WorkerCommand,
    ) -> Self {
        Self {
            config,
            catalog,
            decider,
            worker_command,
            observer: None,
            phase: Phase::Init,
        }
    }

    /// Registers a progress observer.
    #[must_use]
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Last phase entered.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "coordinator phase");
        self.phase = phase;
    }

    /// Executes one run end to end.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError::Store`] if the store cannot be opened or
    /// fails fatally, [`CoordinatorError::Discovery`] if discovery fails, and
    /// [`CoordinatorError::InvalidConfig`] for an unusable configuration.
    #[instrument(skip_all, fields(group = %self.config.group_key, scope = %self.config.scope))]
    pub async fn run(&mut self, interrupt: &AtomicBool) -> Result<RunResult, CoordinatorError> {
        let started = Instant::now();
        self.phase = Phase::Init;
        self.config.validate()?;

        let location = self.config.location();
        let existed = location.exists();
        let store = TaskStore::open(&location, &self.config.store).await?;

        let outcome = self.run_with_store(&store, existed, interrupt, started).await;

        match outcome {
            Ok(mut result) if !result.aborted => {
                let progress = store.progress().await.unwrap_or_default();
                if self.config.cache.should_delete(&progress, result.interrupted) {
                    match store.delete().await {
                        Ok(()) => {
                            self.enter(Phase::CacheDeleted);
                            result.cache_deleted = true;
                        }
                        Err(error) => {
                            warn!(error = %error, "failed to delete task store");
                            self.enter(Phase::CachePreserved);
                        }
                    }
                } else {
                    store.close().await;
                    self.enter(Phase::CachePreserved);
                    info!(path = %location.db_path().display(), "task store preserved for resume");
                }
                self.enter(Phase::Done);
                Ok(result)
            }
            other => {
                store.close().await;
                other
            }
        }
    }

    async fn run_with_store(
        &mut self,
        store: &TaskStore,
        existed: bool,
        interrupt: &AtomicBool,
        started: Instant,
    ) -> Result<RunResult, CoordinatorError> {
        self.enter(Phase::ResumeCheck);
        let mode = self.resume_check(store, existed).await?;
        if mode == StartMode::Abort {
            self.enter(Phase::Aborted);
            info!("run aborted at caller's request");
            return Ok(RunResult {
                aborted: true,
                duration_ms: elapsed_ms(started),
                ..RunResult::default()
            });
        }

        self.enter(Phase::Discovering);
        let plan = self.discover(store, mode).await?;
        info!(
            start_unit = plan.start_unit,
            total_units = plan.total_units,
            item_count = plan.item_count,
            "discovery complete"
        );

        self.enter(Phase::PoolStarted);
        let pool_config = PoolConfig::new(self.config.workers)
            .with_poll_interval(self.config.pool.poll_interval)
            .with_grace_period(self.config.pool.grace_period);
        let mut pool = WorkerPool::new(self.worker_command.clone(), pool_config);
        pool.start();

        self.enter(Phase::Producing);
        let interrupted = match self.produce(store, &plan, interrupt).await {
            Ok(interrupted) => interrupted,
            Err(error) => {
                pool.terminate().await;
                return Err(error);
            }
        };

        let summary = if interrupted {
            warn!("interrupted while producing, stopping workers");
            pool.terminate().await;
            pool.summary()
        } else {
            if let Err(error) = store.set_metadata(keys::INGESTION_COMPLETE, "true").await {
                pool.terminate().await;
                return Err(error.into());
            }
            self.enter(Phase::IngestionSignaled);

            self.enter(Phase::AwaitingWorkers);
            let observer = &mut self.observer;
            pool.wait_for_completion(
                store,
                |progress| {
                    if let Some(observer) = observer.as_mut() {
                        observer(progress);
                    }
                },
                interrupt,
            )
            .await
        };

        self.enter(Phase::Summarized);
        let progress = store.progress().await?;
        let result = RunResult {
            total_units: plan.total_units,
            total_tasks: progress.total,
            completed_tasks: progress.completed,
            failed_tasks: progress.failed,
            duration_ms: elapsed_ms(started),
            workers_used: summary.started_workers(),
            interrupted: interrupted || summary.interrupted,
            aborted: false,
            cache_deleted: false,
        };
        info!(
            total_tasks = result.total_tasks,
            completed = result.completed_tasks,
            failed = result.failed_tasks,
            workers = result.workers_used,
            failed_workers = summary.failed_workers,
            duration_ms = result.duration_ms,
            interrupted = result.interrupted,
            "run summarized"
        );
        Ok(result)
    }

    async fn resume_check(
        &self,
        store: &TaskStore,
        existed: bool,
    ) -> Result<StartMode, CoordinatorError> {
        if self.config.force_fresh || !existed {
            debug!(force_fresh = self.config.force_fresh, existed, "starting fresh");
            store.initialize().await?;
            return Ok(StartMode::Fresh);
        }

        let progress = store.progress().await?;
        if !progress.has_started() {
            debug!(%progress, "previous run made no headway, starting fresh");
            store.initialize().await?;
            return Ok(StartMode::Fresh);
        }

        info!(%progress, "found previous run");
        match self.decider.decide(&progress) {
            ResumeDecision::Resume => {
                let reset = store.reset_in_progress().await?;
                store.set_metadata(keys::INGESTION_COMPLETE, "false").await?;
                info!(reset, "resuming previous run");
                Ok(StartMode::Resume)
            }
            ResumeDecision::Fresh => {
                store.initialize().await?;
                info!("discarded previous run");
                Ok(StartMode::Fresh)
            }
            ResumeDecision::Abort => Ok(StartMode::Abort),
        }
    }

    async fn discover(
        &self,
        store: &TaskStore,
        mode: StartMode,
    ) -> Result<UnitPlan, CoordinatorError> {
        let start_unit = self.config.scope.start_unit();

        if mode == StartMode::Resume
            && store.has_sequence(start_unit).await?
            && let Some(plan) = stored_plan(store, &self.config).await?
        {
            debug!("using stored discovery totals");
            return Ok(plan);
        }

        let discovery = self.catalog.discover(&self.config.locator).await?;
        let plan = UnitPlan {
            start_unit,
            total_units: self
                .config
                .scope
                .total_units(discovery.item_count, self.config.page_size),
            item_count: discovery.item_count,
        };

        store
            .set_metadata(keys::TOTAL_UNITS, &plan.total_units.to_string())
            .await?;
        store
            .set_metadata(keys::ITEM_COUNT, &plan.item_count.to_string())
            .await?;
        store
            .set_metadata(keys::START_UNIT, &plan.start_unit.to_string())
            .await?;
        store
            .set_metadata(keys::SCOPE, &self.config.scope.to_string())
            .await?;
        store
            .set_metadata(keys::PAGE_SIZE, &self.config.page_size.to_string())
            .await?;
        if store.get_metadata(keys::STARTED_AT).await?.is_none() {
            store
                .set_metadata(keys::STARTED_AT, &now_millis().to_string())
                .await?;
        }
        Ok(plan)
    }

    /// Walks the units; returns true when stopped by an interrupt.
    async fn produce(
        &self,
        store: &TaskStore,
        plan: &UnitPlan,
        interrupt: &AtomicBool,
    ) -> Result<bool, CoordinatorError> {
        let mut ingested_units = 0u64;
        let mut skipped_units = 0u64;
        let mut inserted_tasks = 0u64;

        for offset in 0..plan.total_units {
            if is_interrupted(interrupt) {
                return Ok(true);
            }

            let sequence_key = plan.start_unit + i64::try_from(offset).unwrap_or(i64::MAX);
            if store.has_sequence(sequence_key).await? {
                debug!(sequence_key, "unit already ingested, skipping");
                continue;
            }

            match self
                .catalog
                .fetch_unit(&self.config.locator, sequence_key)
                .await
            {
                Ok(entries) => {
                    let tasks: Vec<NewTask> = entries
                        .into_iter()
                        .map(|entry| {
                            NewTask::new(
                                sequence_key,
                                self.config.naming.apply(sequence_key, &entry.name),
                                entry.source_locator,
                                entry
                                    .expected_size
                                    .and_then(|size| i64::try_from(size).ok()),
                            )
                        })
                        .collect();
                    let inserted = store.insert_tasks(&tasks).await?;
                    ingested_units += 1;
                    inserted_tasks += inserted;
                    if self.config.verbose > 0 {
                        info!(sequence_key, listed = tasks.len(), inserted, "unit ingested");
                    } else {
                        debug!(sequence_key, listed = tasks.len(), inserted, "unit ingested");
                    }
                }
                Err(error) => {
                    skipped_units += 1;
                    warn!(sequence_key, error = %error, "unit fetch failed, skipping");
                }
            }

            if offset + 1 < plan.total_units
                && sleep_unless_interrupted(self.config.rate_limit, interrupt).await
            {
                return Ok(true);
            }
        }

        info!(
            ingested_units,
            skipped_units, inserted_tasks, "production finished"
        );
        Ok(false)
    }
}

/// Totals of the previous run, if it asked for the same units.
async fn stored_plan(
    store: &TaskStore,
    config: &CoordinatorConfig,
) -> Result<Option<UnitPlan>, StoreError> {
    let start_unit = config.scope.start_unit();
    let stored_scope = store.get_metadata(keys::SCOPE).await?;
    let stored_page_size = store.get_metadata(keys::PAGE_SIZE).await?;
    if stored_scope.as_deref() != Some(config.scope.to_string().as_str())
        || stored_page_size.as_deref() != Some(config.page_size.to_string().as_str())
    {
        debug!(?stored_scope, ?stored_page_size, "requested units changed since last run");
        return Ok(None);
    }

    let total_units = store.get_metadata(keys::TOTAL_UNITS).await?;
    let item_count = store.get_metadata(keys::ITEM_COUNT).await?;
    let stored_start = store.get_metadata(keys::START_UNIT).await?;

    let (Some(total_units), Some(item_count), Some(stored_start)) =
        (total_units, item_count, stored_start)
    else {
        return Ok(None);
    };
    let (Ok(total_units), Ok(item_count), Ok(stored_start)) = (
        total_units.parse::<u64>(),
        item_count.parse::<u64>(),
        stored_start.parse::<i64>(),
    ) else {
        return Ok(None);
    };
    if stored_start != start_unit {
        return Ok(None);
    }

    Ok(Some(UnitPlan {
        start_unit,
        total_units,
        item_count,
    }))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, Discovery, FetchError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Catalog with `per_unit` items in every unit; `broken` units fail.
    struct FakeCatalog {
        item_count: u64,
        per_unit: usize,
        broken: Vec<i64>,
        fail_discovery: bool,
        fetched: Arc<Mutex<Vec<i64>>>,
        discoveries: Arc<AtomicUsize>,
    }

    impl FakeCatalog {
        fn new(item_count: u64, per_unit: usize) -> Self {
            Self {
                item_count,
                per_unit,
                broken: Vec::new(),
                fail_discovery: false,
                fetched: Arc::default(),
                discoveries: Arc::default(),
            }
        }

        /// Handle that keeps reporting fetched units after the catalog is moved.
        fn recorder(&self) -> Arc<Mutex<Vec<i64>>> {
            Arc::clone(&self.fetched)
        }

        fn discovery_counter(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.discoveries)
        }
    }

    #[async_trait]
    impl Catalog for FakeCatalog {
        async fn discover(&self, locator: &str) -> Result<Discovery, DiscoveryError> {
            self.discoveries.fetch_add(1, Ordering::SeqCst);
            if self.fail_discovery {
                return Err(DiscoveryError::HttpStatus {
                    locator: locator.to_string(),
                    status: 500,
                });
            }
            Ok(Discovery {
                item_count: self.item_count,
            })
        }

        async fn fetch_unit(
            &self,
            locator: &str,
            sequence_key: i64,
        ) -> Result<Vec<CatalogEntry>, FetchError> {
            self.fetched.lock().unwrap().push(sequence_key);
            if self.broken.contains(&sequence_key) {
                return Err(FetchError::HttpStatus {
                    locator: locator.to_string(),
                    sequence_key,
                    status: 502,
                });
            }
            Ok((0..self.per_unit)
                .map(|i| {
                    CatalogEntry::new(
                        format!("u{sequence_key}-{i}.bin"),
                        format!("http://127.0.0.1:9/u{sequence_key}/{i}"),
                        None,
                    )
                })
                .collect())
        }
    }

    fn units(recorder: &Arc<Mutex<Vec<i64>>>) -> Vec<i64> {
        recorder.lock().unwrap().clone()
    }

    fn idle_workers() -> WorkerCommand {
        WorkerCommand::new("sh").args(["-c", "exit 0", "sh"])
    }

    fn config(root: &TempDir, scope: DiscoveryScope) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::new(root.path(), "cats", "http://catalog", scope);
        config.workers = 2;
        config.page_size = 2;
        config.rate_limit = Duration::ZERO;
        config.pool = PoolConfig::new(2).with_poll_interval(Duration::from_millis(10));
        config
    }

    async fn seed_completed_unit(config: &CoordinatorConfig, unit: i64, total_units: u64) {
        let store = TaskStore::open(&config.location(), &config.store)
            .await
            .unwrap();
        store.initialize().await.unwrap();
        store
            .insert_tasks(&[NewTask::new(unit, "seed.bin", "http://127.0.0.1:9/seed", None)])
            .await
            .unwrap();
        let task = store.claim_next("worker-1").await.unwrap().unwrap();
        store.mark_complete(&task.id).await.unwrap();
        store
            .set_metadata(keys::TOTAL_UNITS, &total_units.to_string())
            .await
            .unwrap();
        store.set_metadata(keys::ITEM_COUNT, "6").await.unwrap();
        store
            .set_metadata(keys::START_UNIT, &unit.to_string())
            .await
            .unwrap();
        store
            .set_metadata(keys::SCOPE, &config.scope.to_string())
            .await
            .unwrap();
        store
            .set_metadata(keys::PAGE_SIZE, &config.page_size.to_string())
            .await
            .unwrap();
        store.close().await;
    }

    #[tokio::test]
    async fn test_fresh_run_ingests_every_unit_and_skips_broken_ones() {
        let root = TempDir::new().unwrap();
        let mut catalog = FakeCatalog::new(6, 2);
        catalog.broken = vec![2];
        let config = config(&root, DiscoveryScope::Sweep { start: 1 });
        let fetched = catalog.recorder();
        let interrupt = AtomicBool::new(false);

        let mut coordinator =
            Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers());
        let result = coordinator.run(&interrupt).await.unwrap();

        assert_eq!(units(&fetched), vec![1, 2, 3]);
        assert_eq!(result.total_units, 3);
        assert_eq!(result.total_tasks, 4);
        assert_eq!(result.completed_tasks, 0);
        assert_eq!(result.workers_used, 2);
        assert!(!result.aborted);
        assert!(!result.cache_deleted);
        assert_eq!(coordinator.phase(), Phase::Done);

        // Pending tasks remain, so the store is kept for a resume.
        let store = TaskStore::open(&config.location(), &config.store)
            .await
            .unwrap();
        assert!(store.is_ingestion_complete().await.unwrap());
        assert_eq!(
            store.get_metadata(keys::TOTAL_UNITS).await.unwrap().as_deref(),
            Some("3")
        );
        assert!(store.has_sequence(3).await.unwrap());
        assert!(!store.has_sequence(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_sequenced_naming_prefixes_task_names() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(2, 1);
        let mut config = config(&root, DiscoveryScope::Single { unit: 3 });
        config.naming = NamingPolicy::Sequenced;
        let interrupt = AtomicBool::new(false);

        Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        let store = TaskStore::open(&config.location(), &config.store)
            .await
            .unwrap();
        let pending = store.list_by_status(crate::queue::TaskStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "0003_u3-0.bin");
    }

    #[tokio::test]
    async fn test_abort_leaves_previous_run_untouched() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let config = config(&root, DiscoveryScope::Sweep { start: 1 });
        seed_completed_unit(&config, 1, 3).await;
        let fetched = catalog.recorder();
        let interrupt = AtomicBool::new(false);

        let mut coordinator =
            Coordinator::new(config.clone(), catalog, ResumeDecision::Abort, idle_workers());
        let result = coordinator.run(&interrupt).await.unwrap();

        assert!(result.aborted);
        assert_eq!(result.total_tasks, 0);
        assert_eq!(coordinator.phase(), Phase::Aborted);
        assert!(units(&fetched).is_empty());
        assert!(config.location().exists());
    }

    #[tokio::test]
    async fn test_resume_skips_ingested_units_and_reuses_totals() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let mut config = config(&root, DiscoveryScope::Sweep { start: 1 });
        config.cache = CachePolicy::Keep;
        seed_completed_unit(&config, 1, 3).await;
        let fetched = catalog.recorder();
        let discoveries = catalog.discovery_counter();
        let interrupt = AtomicBool::new(false);

        let result = Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert_eq!(units(&fetched), vec![2, 3]);
        assert_eq!(discoveries.load(Ordering::SeqCst), 0);
        assert_eq!(result.total_units, 3);
        assert_eq!(result.total_tasks, 5);
        assert_eq!(result.completed_tasks, 1);
    }

    #[tokio::test]
    async fn test_resume_with_wider_range_rediscovers() {
        let root = TempDir::new().unwrap();
        let narrow = config(&root, DiscoveryScope::Range { start: 1, end: 1 });
        seed_completed_unit(&narrow, 1, 1).await;

        let catalog = FakeCatalog::new(6, 2);
        let mut wide = config(&root, DiscoveryScope::Range { start: 1, end: 3 });
        wide.cache = CachePolicy::Keep;
        let fetched = catalog.recorder();
        let discoveries = catalog.discovery_counter();
        let interrupt = AtomicBool::new(false);

        let result = Coordinator::new(wide.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert_eq!(discoveries.load(Ordering::SeqCst), 1);
        assert_eq!(units(&fetched), vec![2, 3]);
        assert_eq!(result.total_units, 3);
        assert_eq!(result.total_tasks, 5);

        let store = TaskStore::open(&wide.location(), &wide.store).await.unwrap();
        assert_eq!(
            store.get_metadata(keys::SCOPE).await.unwrap().as_deref(),
            Some("units 1..=3")
        );
        assert_eq!(
            store.get_metadata(keys::TOTAL_UNITS).await.unwrap().as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn test_fresh_decision_discards_previous_run() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let config = config(&root, DiscoveryScope::Single { unit: 1 });
        seed_completed_unit(&config, 1, 1).await;
        let fetched = catalog.recorder();
        let interrupt = AtomicBool::new(false);

        let result = Coordinator::new(config, catalog, ResumeDecision::Fresh, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert_eq!(units(&fetched), vec![1]);
        assert_eq!(result.total_tasks, 2);
        assert_eq!(result.completed_tasks, 0);
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let root = TempDir::new().unwrap();
        let mut catalog = FakeCatalog::new(6, 2);
        catalog.fail_discovery = true;
        let config = config(&root, DiscoveryScope::Sweep { start: 1 });
        let fetched = catalog.recorder();
        let interrupt = AtomicBool::new(false);

        let error = Coordinator::new(config, catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap_err();

        assert!(matches!(error, CoordinatorError::Discovery(_)));
        assert!(units(&fetched).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_scope_is_rejected_before_opening_store() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let config = config(&root, DiscoveryScope::Range { start: 4, end: 2 });
        let interrupt = AtomicBool::new(false);

        let error = Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap_err();

        assert!(matches!(error, CoordinatorError::InvalidConfig(_)));
        assert!(!config.location().exists());
    }

    #[tokio::test]
    async fn test_delete_policy_removes_store() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(2, 1);
        let mut config = config(&root, DiscoveryScope::Single { unit: 1 });
        config.cache = CachePolicy::Delete;
        let interrupt = AtomicBool::new(false);

        let result = Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert!(result.cache_deleted);
        assert!(!config.location().exists());
    }

    #[tokio::test]
    async fn test_interrupt_before_production_keeps_store() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let config = config(&root, DiscoveryScope::Sweep { start: 1 });
        let fetched = catalog.recorder();
        let interrupt = AtomicBool::new(true);

        let result = Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert!(result.interrupted);
        assert!(!result.cache_deleted);
        assert!(units(&fetched).is_empty());
        assert!(config.location().exists());
    }

    #[tokio::test]
    async fn test_interrupt_keeps_store_even_with_delete_policy() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(6, 2);
        let mut config = config(&root, DiscoveryScope::Sweep { start: 1 });
        config.cache = CachePolicy::Delete;
        let interrupt = AtomicBool::new(true);

        let result = Coordinator::new(config.clone(), catalog, ResumeDecision::Resume, idle_workers())
            .run(&interrupt)
            .await
            .unwrap();

        assert!(result.interrupted);
        assert!(!result.cache_deleted);
        assert!(config.location().exists());
    }

    #[tokio::test]
    async fn test_workers_used_excludes_spawn_failures() {
        let root = TempDir::new().unwrap();
        let catalog = FakeCatalog::new(2, 1);
        let mut config = config(&root, DiscoveryScope::Single { unit: 1 });
        config.cache = CachePolicy::Keep;
        let interrupt = AtomicBool::new(false);
        let missing = WorkerCommand::new("/nonexistent/harvester-worker");

        let result = Coordinator::new(config, catalog, ResumeDecision::Resume, missing)
            .run(&interrupt)
            .await
            .unwrap();

        assert_eq!(result.workers_used, 0);
        assert_eq!(result.total_tasks, 1);
        assert_eq!(result.completed_tasks, 0);
    }
}
