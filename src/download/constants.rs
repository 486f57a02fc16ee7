//! Constants for the download module.

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Suffix of the file a body is streamed into before it is renamed.
pub const PARTIAL_SUFFIX: &str = ".part";
