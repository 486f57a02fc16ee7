//! Harvester Core Library
//!
//! Resumable, multi-process batch downloading coordinated through a shared
//! `SQLite` task queue. One coordinator discovers work page by page and
//! inserts it as tasks; independent worker processes claim tasks atomically,
//! download them and record the outcome. An interrupted or crashed run picks
//! up where it left off.
//!
//! # Architecture
//!
//! - [`db`] - Database connection, pragmas and migrations
//! - [`retry`] - Bounded retry with escalating delay, shared by every retry site
//! - [`queue`] - Task store: claims, outcomes, progress and run metadata
//! - [`catalog`] - Discovery collaborator (how much work, and which items per unit)
//! - [`download`] - Item fetcher with streaming and integrity checks
//! - [`worker`] - Consumer loop run inside each worker process
//! - [`pool`] - Supervisor that spawns and stops worker processes
//! - [`coordinator`] - Producer that drives a whole run

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod coordinator;
pub mod db;
pub mod download;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod worker;

pub(crate) mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEntry, Discovery, DiscoveryError, FetchError, HttpCatalog};
pub use coordinator::{
    CachePolicy, Coordinator, CoordinatorConfig, CoordinatorError, DiscoveryScope, NamingPolicy,
    ResumeDecider, ResumeDecision, RunResult,
};
pub use db::{Database, DatabaseOptions, DbError};
pub use download::{DownloadError, HttpClient, ItemFetcher, ItemRequest, sanitize_filename};
pub use pool::{PoolConfig, PoolSummary, WorkerCommand, WorkerPool};
pub use queue::{
    NewTask, Progress, StoreError, StoreLocation, StoreOptions, Task, TaskRepository, TaskStatus,
    TaskStore,
};
pub use retry::{Backoff, RetryDecision, RetryFailure, RetryPolicy, run_with_retry};
pub use worker::{Worker, WorkerConfig, WorkerError, WorkerExit, WorkerReport};
