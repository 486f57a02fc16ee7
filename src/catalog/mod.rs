//! Discovery collaborator.
//!
//! The coordinator learns how much work exists and which items make up each
//! discovery unit (page) through the [`Catalog`] trait. [`HttpCatalog`] is the
//! production implementation backed by a JSON listing endpoint.

mod error;
mod http;

use async_trait::async_trait;
use serde::Deserialize;

pub use error::{DiscoveryError, FetchError};
pub use http::HttpCatalog;

/// Result of the single discovery fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Discovery {
    /// Total number of items the catalog reports.
    pub item_count: u64,
}

/// One item listed in a discovery unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Target filename as the catalog names it.
    pub name: String,
    /// Address handed to the item fetcher.
    pub source_locator: String,
    /// Byte-size hint.
    pub expected_size: Option<u64>,
}

impl CatalogEntry {
    /// Creates a new entry.
    pub fn new(
        name: impl Into<String>,
        source_locator: impl Into<String>,
        expected_size: Option<u64>,
    ) -> Self {
        Self {
            name: name.into(),
            source_locator: source_locator.into(),
            expected_size,
        }
    }
}

/// Source of work for the coordinator.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Learns the total item cardinality behind `locator`.
    ///
    /// A failure here aborts the run.
    async fn discover(&self, locator: &str) -> Result<Discovery, DiscoveryError>;

    /// Lists the items of one discovery unit.
    ///
    /// A failure here skips the unit.
    async fn fetch_unit(
        &self,
        locator: &str,
        sequence_key: i64,
    ) -> Result<Vec<CatalogEntry>, FetchError>;
}
