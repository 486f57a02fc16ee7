//! Exit code logic for the harvester process.
//!
//! Single responsibility: map run and worker outcomes to the process exit outcome.

use harvester_core::worker::{EXIT_FAILURES, EXIT_INTERRUPTED, EXIT_SUCCESS};
use harvester_core::{RunResult, WorkerReport};

use crate::ProcessExit;

/// Determines the exit outcome of `harvester run`.
pub(crate) fn determine_run_exit(result: &RunResult) -> ProcessExit {
    if result.aborted {
        ProcessExit::Success
    } else if result.interrupted {
        ProcessExit::Interrupted
    } else if result.failed_tasks > 0 {
        ProcessExit::Failure
    } else {
        ProcessExit::Success
    }
}

/// Determines the exit outcome of `harvester worker`.
pub(crate) fn determine_worker_exit(report: &WorkerReport) -> ProcessExit {
    match report.exit_code() {
        EXIT_SUCCESS => ProcessExit::Success,
        EXIT_FAILURES => ProcessExit::Failure,
        EXIT_INTERRUPTED => ProcessExit::Interrupted,
        _ => ProcessExit::Fatal,
    }
}
