//! Application runtime composition modules.

pub(crate) mod config;
pub(crate) mod exit_handler;
pub(crate) mod progress;
pub(crate) mod run_command;
pub(crate) mod signals;
pub(crate) mod terminal;
pub(crate) mod worker_command;
