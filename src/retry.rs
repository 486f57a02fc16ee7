//! Bounded retry with escalating delay.
//!
//! This module provides the [`RetryPolicy`] used by every retry site in the
//! crate: the task store wraps its transactions in it to ride out `SQLite`
//! busy/locked contention between processes, and workers wrap item downloads
//! in it before giving up on a task.
//!
//! # Overview
//!
//! A policy answers two questions:
//! - [`RetryPolicy::should_retry`] - given the attempt that just failed, retry or stop?
//! - [`RetryPolicy::delay_for`] - how long to wait before the next attempt?
//!
//! [`run_with_retry`] drives an async operation through a policy and reports
//! whether it ultimately failed because the error was not retryable or because
//! the attempt budget ran out.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::retry::{RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::linear(3, Duration::from_millis(100));
//!
//! match policy.should_retry(1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(100));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Default maximum attempts for a single download (initial try included).
pub const DEFAULT_DOWNLOAD_ATTEMPTS: u32 = 3;

/// Default base delay between download attempts.
pub const DEFAULT_DOWNLOAD_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default attempt ceiling for store operations under contention.
pub const DEFAULT_STORE_ATTEMPTS: u32 = 10;

/// Default base delay between store attempts under contention.
pub const DEFAULT_STORE_BASE_DELAY: Duration = Duration::from_millis(100);

/// Jitter added to store retries so racing workers spread out.
const DEFAULT_STORE_JITTER: Duration = Duration::from_millis(25);

/// Default maximum delay cap.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * multiplier^(attempt - 1)`
    Exponential {
        /// Growth factor per attempt.
        multiplier: f32,
    },
}

/// Decision on whether to retry a failed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the operation.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for bounded retries with escalating delay.
///
/// # Delay Calculation
///
/// ```text
/// linear:      delay = min(base_delay * attempt, max_delay) + jitter
/// exponential: delay = min(base_delay * multiplier^(attempt-1), max_delay) + jitter
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,
    /// Delay unit for the first retry.
    base_delay: Duration,
    /// Growth strategy.
    backoff: Backoff,
    /// Maximum delay cap (before jitter).
    max_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(DEFAULT_DOWNLOAD_ATTEMPTS, DEFAULT_DOWNLOAD_BASE_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a linear policy: the n-th retry waits `base_delay * n`.
    #[must_use]
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Linear,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: Duration::ZERO,
        }
    }

    /// Creates an exponential policy with the given multiplier.
    #[must_use]
    pub fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff: Backoff::Exponential { multiplier },
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: Duration::ZERO,
        }
    }

    /// Policy used by the task store for busy/locked contention.
    #[must_use]
    pub fn store_contention() -> Self {
        Self::linear(DEFAULT_STORE_ATTEMPTS, DEFAULT_STORE_BASE_DELAY)
            .with_max_jitter(DEFAULT_STORE_JITTER)
    }

    /// Policy used by workers around a single item download.
    #[must_use]
    pub fn download() -> Self {
        Self::default()
    }

    /// Replaces the delay cap.
    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Replaces the jitter upper bound.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry {
            delay: self.delay_for(attempt),
            attempt: attempt + 1,
        }
    }

    /// Calculates the delay to wait after `attempt` (1-indexed) failed.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_ms = self.base_delay.as_millis() as f64;

        let delay_ms = match self.backoff {
            Backoff::Linear => base_ms * f64::from(attempt),
            Backoff::Exponential { multiplier } => {
                base_ms * f64::from(multiplier).powf(f64::from(attempt - 1))
            }
        };

        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}

/// Why [`run_with_retry`] gave up.
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// The operation returned an error the caller classified as not retryable.
    Fatal {
        /// Attempts made, including the failing one.
        attempts: u32,
        /// The non-retryable error.
        error: E,
    },
    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: E,
    },
}

impl<E> RetryFailure<E> {
    /// Number of attempts made before giving up.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Fatal { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The last error observed.
    #[must_use]
    pub fn error(&self) -> &E {
        match self {
            Self::Fatal { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }

    /// Consumes the failure, returning the last error observed.
    pub fn into_error(self) -> E {
        match self {
            Self::Fatal { error, .. } => error,
            Self::Exhausted { last, .. } => last,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt budget is spent.
///
/// `operation` receives the 1-indexed attempt number.
///
/// # Errors
///
/// Returns [`RetryFailure::Fatal`] when `is_retryable` rejects an error and
/// [`RetryFailure::Exhausted`] when the final attempt still failed.
pub async fn run_with_retry<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !is_retryable(&error) {
            return Err(RetryFailure::Fatal {
                attempts: attempt,
                error,
            });
        }

        match policy.should_retry(attempt) {
            RetryDecision::Retry {
                delay,
                attempt: next,
            } => {
                debug!(
                    operation = label,
                    attempt,
                    next_attempt = next,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "will retry"
                );
                tokio::time::sleep(delay).await;
                attempt = next;
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(operation = label, attempt, %reason, error = %error, "giving up");
                return Err(RetryFailure::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }
        }
    }
}
