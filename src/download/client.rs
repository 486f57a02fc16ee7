//! HTTP client wrapper for downloading items.
//!
//! This module provides the `HttpClient` struct which streams a response body
//! into `{name}.part`, checks the byte count against the catalog's size hint,
//! and renames the file into place only once it is complete.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::filename::{final_path, partial_path};
use super::{ItemFetcher, ItemRequest};
use crate::user_agent;

/// HTTP client for downloading items with streaming support.
///
/// This client is designed to be created once per worker and reused for every
/// task, taking advantage of connection pooling.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Read timeout: 5 minutes (for large files)
    /// - Gzip decompression: enabled
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, DownloadError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Client`] if the TLS backend cannot be initialized.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(DownloadError::Client)?;
        Ok(Self { client })
    }

    /// Downloads `url` to `{destination_dir}/{name}`.
    ///
    /// The body is first written to `{name}.part`; the partial file is removed
    /// on any failure so a retry always starts from scratch.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - The byte count differs from `expected_size`
    /// - Writing to disk fails
    #[instrument(skip(self, destination_dir), fields(url = %url))]
    pub async fn download_item(
        &self,
        url: &str,
        destination_dir: &Path,
        name: &str,
        expected_size: Option<u64>,
    ) -> Result<PathBuf, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        tokio::fs::create_dir_all(destination_dir)
            .await
            .map_err(|e| DownloadError::io(destination_dir, e))?;

        let response = self.send_request(url).await?;

        let partial = partial_path(destination_dir, name);
        let target = final_path(destination_dir, name);
        debug!(path = %target.display(), "resolved output path");

        let mut file = File::create(&partial)
            .await
            .map_err(|e| DownloadError::io(partial.clone(), e))?;

        let written = match stream_to_file(&mut file, response, url, &partial).await {
            Ok(written) => written,
            Err(error) => {
                debug!(path = %partial.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(error);
            }
        };
        drop(file);

        if let Some(expected) = expected_size
            && expected != written
        {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(DownloadError::integrity(target, expected, written));
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| DownloadError::io(target.clone(), e))?;

        info!(path = %target.display(), bytes = written, "download complete");
        Ok(target)
    }

    async fn send_request(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ItemFetcher for HttpClient {
    async fn fetch_item(&self, request: &ItemRequest) -> Result<PathBuf, DownloadError> {
        self.download_item(
            &request.source_locator,
            &request.destination_dir,
            &request.name,
            request.expected_size,
        )
        .await
    }
}

/// Streams response body to file, returning bytes written.
///
/// This is extracted to enable cleanup on error in the caller.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}
