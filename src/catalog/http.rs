//! JSON-over-HTTP catalog.
//!
//! The locator is a listing URL:
//! - `GET {locator}` answers `{"item_count": n}`
//! - `GET {locator}?page={sequence}` answers `{"items": [{"name", "url", "size"}]}`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::{Catalog, CatalogEntry, Discovery, DiscoveryError, FetchError};
use crate::download::{CONNECT_TIMEOUT_SECS, sanitize_filename};
use crate::user_agent;

/// Listing requests are small; anything slower than this is a stuck server.
const LISTING_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct UnitResponse {
    items: Vec<UnitItem>,
}

#[derive(Debug, Deserialize)]
struct UnitItem {
    name: String,
    url: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Catalog backed by a JSON listing endpoint.
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: Client,
}

impl HttpCatalog {
    /// Creates a catalog client.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, DiscoveryError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(LISTING_TIMEOUT_SECS))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(DiscoveryError::Client)?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, GetError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(GetError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GetError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(GetError::Request)?;
        serde_json::from_str(&body).map_err(|e| GetError::Parse(e.to_string()))
    }
}

/// Transport outcome shared by both endpoints before it is tagged with context.
enum GetError {
    Request(reqwest::Error),
    Status(u16),
    Parse(String),
}

#[async_trait]
impl Catalog for HttpCatalog {
    #[instrument(skip(self))]
    async fn discover(&self, locator: &str) -> Result<Discovery, DiscoveryError> {
        let url = Url::parse(locator).map_err(|_| DiscoveryError::InvalidLocator {
            locator: locator.to_string(),
        })?;

        let discovery: Discovery = self.get_json(url).await.map_err(|error| match error {
            GetError::Request(source) => DiscoveryError::Request {
                locator: locator.to_string(),
                source,
            },
            GetError::Status(status) => DiscoveryError::HttpStatus {
                locator: locator.to_string(),
                status,
            },
            GetError::Parse(message) => DiscoveryError::Parse {
                locator: locator.to_string(),
                message,
            },
        })?;

        debug!(item_count = discovery.item_count, "catalog discovered");
        Ok(discovery)
    }

    #[instrument(skip(self))]
    async fn fetch_unit(
        &self,
        locator: &str,
        sequence_key: i64,
    ) -> Result<Vec<CatalogEntry>, FetchError> {
        let mut url = Url::parse(locator).map_err(|_| FetchError::InvalidLocator {
            locator: locator.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("page", &sequence_key.to_string());

        let unit: UnitResponse = self.get_json(url).await.map_err(|error| match error {
            GetError::Request(source) => FetchError::Request {
                locator: locator.to_string(),
                sequence_key,
                source,
            },
            GetError::Status(status) => FetchError::HttpStatus {
                locator: locator.to_string(),
                sequence_key,
                status,
            },
            GetError::Parse(message) => FetchError::Parse {
                locator: locator.to_string(),
                sequence_key,
                message,
            },
        })?;

        let entries: Vec<CatalogEntry> = unit
            .items
            .into_iter()
            .filter(|item| !item.name.trim().is_empty())
            .map(|item| CatalogEntry::new(sanitize_filename(&item.name), item.url, item.size))
            .collect();

        debug!(entries = entries.len(), "unit fetched");
        Ok(entries)
    }
}
