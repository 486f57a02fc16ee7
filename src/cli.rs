//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use harvester_core::{CachePolicy, NamingPolicy, ResumeDecision};

/// Resumable multi-process batch downloader.
///
/// `harvester run` discovers items page by page and hands them to a pool of
/// worker processes through a shared task queue. Interrupted runs resume
/// where they stopped.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Discover items and download them with a pool of workers
    Run(RunArgs),
    /// Consume tasks from an existing queue (spawned by `run`)
    Worker(WorkerArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Catalog URL to discover items from
    pub locator: String,

    /// Name of this run; one queue is kept per group
    #[arg(short, long)]
    pub group: String,

    /// Directory holding the queue cache (default: config `root_dir`, else `.`)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Directory downloads are saved to (default: `{root}/downloads/{group}`)
    #[arg(short = 'o', long = "dest")]
    pub dest: Option<PathBuf>,

    /// First discovery unit (page), 1-based
    #[arg(long, default_value_t = 1, conflicts_with = "single")]
    pub start: i64,

    /// Last discovery unit, inclusive (default: the last one the catalog has)
    #[arg(long, conflicts_with = "single")]
    pub end: Option<i64>,

    /// Ingest exactly one discovery unit
    #[arg(long)]
    pub single: Option<i64>,

    /// Worker processes to run (1-10)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub workers: Option<u8>,

    /// Discard any previous state for this group without asking
    #[arg(long)]
    pub fresh: bool,

    /// What to do when a previous run left work behind: resume, fresh or abort
    #[arg(long, default_value = "resume")]
    pub on_existing: ResumeDecision,

    /// How task names are derived: original or sequenced
    #[arg(long)]
    pub naming: Option<NamingPolicy>,

    /// Queue retention after the run: auto, keep or delete
    #[arg(long)]
    pub cache: Option<CachePolicy>,

    /// Items per discovery unit
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub page_size: Option<u64>,

    /// Delay between discovery unit fetches in milliseconds (max 60000)
    #[arg(short = 'l', long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: Option<u64>,

    /// Read defaults from this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the final summary as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Directory holding the queue cache
    #[arg(long)]
    pub root: PathBuf,

    /// Group whose queue to consume
    #[arg(short, long)]
    pub group: String,

    /// Directory downloads are saved to
    #[arg(short = 'o', long = "dest")]
    pub dest: PathBuf,

    /// Identifier recorded as task owner
    #[arg(long)]
    pub worker_id: String,

    /// Idle delay between polls in milliseconds
    #[arg(long, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(10..=60000))]
    pub poll_ms: u64,

    /// SQLite busy timeout in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=120_000))]
    pub busy_timeout_ms: Option<u32>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
