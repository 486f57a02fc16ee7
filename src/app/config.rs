//! File configuration and its merge with command-line arguments.
//!
//! Precedence: values given on the command line, then the config file, then
//! built-in defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use harvester_core::coordinator::{DEFAULT_PAGE_SIZE, DEFAULT_RATE_LIMIT};
use harvester_core::{
    CachePolicy, CoordinatorConfig, DatabaseOptions, DiscoveryScope, NamingPolicy, PoolConfig,
    StoreOptions,
};

use crate::cli::RunArgs;

const DEFAULT_WORKERS: usize = 3;
const DEFAULT_WORKER_POLL_MS: u64 = 2000;

/// TOML-backed defaults for `harvester run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct FileConfig {
    /// Directory holding the queue cache.
    pub(crate) root_dir: Option<PathBuf>,
    /// Worker processes per run (1..=10).
    pub(crate) workers: Option<u8>,
    /// Items per discovery unit.
    pub(crate) page_size: Option<u64>,
    /// Delay between discovery unit fetches.
    pub(crate) rate_limit_ms: Option<u64>,
    /// Idle poll interval handed to workers.
    pub(crate) worker_poll_ms: Option<u64>,
    /// `SQLite` busy timeout.
    pub(crate) db_busy_timeout_ms: Option<u32>,
    pub(crate) cache: Option<CachePolicy>,
    pub(crate) naming: Option<NamingPolicy>,
    pub(crate) verbosity: Option<VerbositySetting>,
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(workers) = self.workers
            && !(1..=10).contains(&workers)
        {
            bail!("Invalid config value for `workers`: {workers}. Expected range: 1..=10");
        }
        if let Some(page_size) = self.page_size
            && page_size == 0
        {
            bail!("Invalid config value for `page_size`: 0. Expected at least 1");
        }
        if let Some(rate_limit) = self.rate_limit_ms
            && rate_limit > 60_000
        {
            bail!(
                "Invalid config value for `rate_limit_ms`: {rate_limit}. Expected range: 0..=60000"
            );
        }
        if let Some(poll) = self.worker_poll_ms
            && !(10..=60_000).contains(&poll)
        {
            bail!("Invalid config value for `worker_poll_ms`: {poll}. Expected range: 10..=60000");
        }
        if let Some(busy) = self.db_busy_timeout_ms
            && busy > 120_000
        {
            bail!(
                "Invalid config value for `db_busy_timeout_ms`: {busy}. Expected range: 0..=120000"
            );
        }
        Ok(())
    }
}

/// Parses and validates a config document.
pub(crate) fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/harvester/config.toml`
/// 2. `$HOME/.config/harvester/config.toml`
#[must_use]
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("harvester")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("harvester")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default location is optional.
pub(crate) fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match resolve_default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        },
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    let config = parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
    Ok(Some(config))
}

/// Effective settings for one `harvester run`.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) coordinator: CoordinatorConfig,
    pub(crate) destination_dir: PathBuf,
    pub(crate) worker_poll_ms: u64,
    pub(crate) verbose: u8,
    pub(crate) quiet: bool,
}

/// Merges command-line arguments over file config over defaults.
pub(crate) fn resolve_run_settings(
    args: &RunArgs,
    file_config: Option<&FileConfig>,
) -> Result<RunSettings> {
    let file = file_config.cloned().unwrap_or_default();

    let root_dir = args
        .root
        .clone()
        .or(file.root_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    let destination_dir = args
        .dest
        .clone()
        .unwrap_or_else(|| root_dir.join("downloads").join(&args.group));

    let (verbose, quiet) = if args.verbose > 0 || args.quiet {
        (args.verbose, args.quiet)
    } else {
        match file.verbosity {
            Some(VerbositySetting::Verbose) => (1, false),
            Some(VerbositySetting::Debug) => (2, false),
            Some(VerbositySetting::Quiet) => (0, true),
            Some(VerbositySetting::Default) | None => (0, false),
        }
    };

    let scope = match args.single {
        Some(unit) => DiscoveryScope::Single { unit },
        None => DiscoveryScope::from_units(args.start, args.end),
    };
    if let Err(message) = scope.validate() {
        bail!("Invalid discovery range: {message}");
    }

    let workers = args
        .workers
        .or(file.workers)
        .map_or(DEFAULT_WORKERS, usize::from);
    let page_size = args.page_size.or(file.page_size).unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 {
        bail!("Invalid effective page_size value: 0. Expected at least 1");
    }
    let rate_limit = args
        .rate_limit
        .or(file.rate_limit_ms)
        .map_or(DEFAULT_RATE_LIMIT, Duration::from_millis);

    let mut database = DatabaseOptions::default();
    if let Some(busy_timeout_ms) = file.db_busy_timeout_ms {
        database.busy_timeout_ms = busy_timeout_ms;
    }

    let mut coordinator = CoordinatorConfig::new(&root_dir, &args.group, &args.locator, scope);
    coordinator.workers = workers;
    coordinator.force_fresh = args.fresh;
    coordinator.verbose = verbose;
    coordinator.naming = args.naming.or(file.naming).unwrap_or_default();
    coordinator.cache = args.cache.or(file.cache).unwrap_or_default();
    coordinator.page_size = page_size;
    coordinator.rate_limit = rate_limit;
    coordinator.pool = PoolConfig::new(workers);
    coordinator.store = StoreOptions {
        database,
        ..StoreOptions::default()
    };

    Ok(RunSettings {
        coordinator,
        destination_dir,
        worker_poll_ms: file.worker_poll_ms.unwrap_or(DEFAULT_WORKER_POLL_MS),
        verbose,
        quiet,
    })
}
