//! `harvester run`: coordinator entry point.

use std::env;
use std::io::{self, IsTerminal};
use std::time::Duration;

use anyhow::{Context, Result};
use harvester_core::{Coordinator, HttpCatalog, RunResult, WorkerCommand};
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::config::{self, RunSettings};
use crate::app::{exit_handler, progress, signals, terminal};
use crate::cli::RunArgs;

pub(crate) async fn run(args: RunArgs) -> Result<ProcessExit> {
    let file_config = config::load_file_config(args.config.as_deref())?;
    let settings = config::resolve_run_settings(&args, file_config.as_ref())?;

    terminal::init_tracing(terminal::resolve_default_log_level(
        settings.verbose,
        settings.quiet,
    ));
    debug!(?args, "CLI arguments parsed");
    info!(
        group = %settings.coordinator.group_key,
        scope = %settings.coordinator.scope,
        workers = settings.coordinator.workers,
        "Harvester starting"
    );

    let interrupted = signals::install_interrupt_handler();
    let catalog = HttpCatalog::new().context("Failed to build catalog HTTP client")?;
    let worker_command = build_worker_command(&settings)?;

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        settings.quiet,
        terminal::is_dumb_terminal(),
    );
    let bar = progress::create_progress_bar(use_bar);

    let mut coordinator = Coordinator::new(
        settings.coordinator.clone(),
        catalog,
        args.on_existing,
        worker_command,
    )
    .with_observer(progress::observer(bar.clone()));

    let outcome = coordinator.run(&interrupted).await;
    bar.finish_and_clear();
    let result = outcome.context("Run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !settings.quiet {
        print_summary(&result, &settings);
    }

    if result.interrupted {
        warn!(
            completed = result.completed_tasks,
            total = result.total_tasks,
            "Interrupted. Run again to resume."
        );
    }

    Ok(exit_handler::determine_run_exit(&result))
}

/// Command line for one worker; the pool appends `--worker-id`.
fn build_worker_command(settings: &RunSettings) -> Result<WorkerCommand> {
    let program = env::current_exe().context("Failed to locate the harvester executable")?;
    let coordinator = &settings.coordinator;

    let mut command = WorkerCommand::new(program).args([
        "worker".to_string(),
        "--root".to_string(),
        coordinator.root_dir.to_string_lossy().into_owned(),
        "--group".to_string(),
        coordinator.group_key.clone(),
        "--dest".to_string(),
        settings.destination_dir.to_string_lossy().into_owned(),
        "--poll-ms".to_string(),
        settings.worker_poll_ms.to_string(),
        "--busy-timeout-ms".to_string(),
        coordinator.store.database.busy_timeout_ms.to_string(),
    ]);
    if settings.quiet {
        command = command.arg("--quiet");
    }
    for _ in 0..settings.verbose {
        command = command.arg("--verbose");
    }
    Ok(command)
}

fn print_summary(result: &RunResult, settings: &RunSettings) {
    if result.aborted {
        println!("Aborted: previous run for '{}' left untouched.", settings.coordinator.group_key);
        return;
    }

    println!(
        "Downloaded {}/{} items ({} failed) from {} units with {} workers in {:.1}s",
        result.completed_tasks,
        result.total_tasks,
        result.failed_tasks,
        result.total_units,
        result.workers_used,
        Duration::from_millis(result.duration_ms).as_secs_f64()
    );
    println!("Saved to {}", settings.destination_dir.display());
    if !result.cache_deleted {
        println!(
            "Queue kept at {} (rerun the same command to resume)",
            settings.coordinator.location().db_path().display()
        );
    }
}
