//! Error types for catalog lookups.

use thiserror::Error;

/// Errors from the discovery fetch. Fatal to the run.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The locator is not a usable URL.
    #[error("invalid catalog locator: {locator}")]
    InvalidLocator {
        /// The rejected locator.
        locator: String,
    },

    /// The request could not be completed.
    #[error("cannot reach catalog {locator}: {source}")]
    Request {
        /// Catalog locator.
        locator: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The catalog answered with an error status.
    #[error("catalog {locator} returned HTTP {status}")]
    HttpStatus {
        /// Catalog locator.
        locator: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body was not the expected JSON document.
    #[error("unexpected catalog response from {locator}: {message}")]
    Parse {
        /// Catalog locator.
        locator: String,
        /// Decoder error text.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build catalog HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Errors from fetching one discovery unit. The unit is skipped.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The locator is not a usable URL.
    #[error("invalid catalog locator: {locator}")]
    InvalidLocator {
        /// The rejected locator.
        locator: String,
    },

    /// The request could not be completed.
    #[error("cannot fetch unit {sequence_key} of {locator}: {source}")]
    Request {
        /// Catalog locator.
        locator: String,
        /// Unit that failed.
        sequence_key: i64,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The catalog answered with an error status.
    #[error("unit {sequence_key} of {locator} returned HTTP {status}")]
    HttpStatus {
        /// Catalog locator.
        locator: String,
        /// Unit that failed.
        sequence_key: i64,
        /// HTTP status code.
        status: u16,
    },

    /// The body was not the expected JSON document.
    #[error("unexpected response for unit {sequence_key} of {locator}: {message}")]
    Parse {
        /// Catalog locator.
        locator: String,
        /// Unit that failed.
        sequence_key: i64,
        /// Decoder error text.
        message: String,
    },
}
