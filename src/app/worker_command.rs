//! `harvester worker`: one consumer process, spawned by the pool.

use std::time::Duration;

use anyhow::{Context, Result};
use harvester_core::{
    HttpClient, StoreLocation, StoreOptions, TaskStore, Worker, WorkerConfig,
};
use tracing::{error, info};

use crate::ProcessExit;
use crate::app::{exit_handler, signals, terminal};
use crate::cli::WorkerArgs;

pub(crate) async fn run(args: WorkerArgs) -> Result<ProcessExit> {
    terminal::init_tracing(terminal::resolve_default_log_level(args.verbose, args.quiet));

    let location = StoreLocation::new(&args.root, &args.group);
    if !location.exists() {
        error!(
            worker_id = %args.worker_id,
            path = %location.db_path().display(),
            "no task store for this group; workers are started by `harvester run`"
        );
        return Ok(ProcessExit::Fatal);
    }

    let mut options = StoreOptions::default();
    if let Some(busy_timeout_ms) = args.busy_timeout_ms {
        options.database.busy_timeout_ms = busy_timeout_ms;
    }
    let store = match TaskStore::open(&location, &options).await {
        Ok(store) => store,
        Err(e) => {
            error!(worker_id = %args.worker_id, error = %e, "cannot open task store");
            return Ok(ProcessExit::Fatal);
        }
    };

    let client = HttpClient::new().context("Failed to build download HTTP client")?;
    let config = WorkerConfig::new(&args.worker_id, &args.dest)
        .with_poll_interval(Duration::from_millis(args.poll_ms));

    let interrupted = signals::install_interrupt_handler();
    let worker = Worker::new(store.clone(), client, config);
    let outcome = worker.run(&interrupted).await;
    store.close().await;

    match outcome {
        Ok(report) => {
            info!(
                worker_id = %report.worker_id,
                completed = report.completed,
                failed = report.failed,
                exit = ?report.exit,
                "worker done"
            );
            Ok(exit_handler::determine_worker_exit(&report))
        }
        Err(e) => {
            error!(error = %e, "worker stopped on store failure");
            Ok(ProcessExit::Fatal)
        }
    }
}
