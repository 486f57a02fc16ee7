//! CLI entry point for harvester.

use std::process::ExitCode;

use clap::Parser;

mod app;
mod cli;

use cli::{Cli, Command};

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything finished without failures.
    Success,
    /// Some items failed, or a worker's circuit breaker tripped.
    Failure,
    /// Unusable store or bad arguments.
    Fatal,
    /// Stopped by Ctrl-C or SIGTERM.
    Interrupted,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Fatal => 2,
            Self::Interrupted => 130,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Run(args) => app::run_command::run(args).await,
        Command::Worker(args) => app::worker_command::run(args).await,
    };

    match outcome {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Fatal.into()
        }
    }
}
