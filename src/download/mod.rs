//! Item download collaborator.
//!
//! Workers fetch items through the [`ItemFetcher`] trait; [`HttpClient`] is
//! the production implementation.
//!
//! # Features
//!
//! - Streaming downloads (memory-efficient for large files)
//! - Atomic placement: bodies land in `{name}.part` and are renamed when complete
//! - Size verification against the catalog's hint
//! - Structured error types that know whether a retry can help
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::download::{HttpClient, ItemFetcher, ItemRequest};
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let request = ItemRequest {
//!     source_locator: "https://example.com/cat.jpg".to_string(),
//!     destination_dir: PathBuf::from("./downloads"),
//!     name: "cat.jpg".to_string(),
//!     expected_size: None,
//! };
//! let saved = client.fetch_item(&request).await?;
//! println!("Downloaded: {}", saved.display());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod filename;

use std::path::PathBuf;

use async_trait::async_trait;

pub use client::HttpClient;
pub use constants::{CONNECT_TIMEOUT_SECS, PARTIAL_SUFFIX, READ_TIMEOUT_SECS};
pub use error::DownloadError;
pub use filename::sanitize_filename;

/// Everything needed to fetch one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    /// Opaque address of the item.
    pub source_locator: String,
    /// Directory the item is saved into.
    pub destination_dir: PathBuf,
    /// Target filename.
    pub name: String,
    /// Byte-size hint, verified when present.
    pub expected_size: Option<u64>,
}

/// Fetches a single item to disk.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// Downloads the item and returns the path it was saved to.
    async fn fetch_item(&self, request: &ItemRequest) -> Result<PathBuf, DownloadError>;
}
