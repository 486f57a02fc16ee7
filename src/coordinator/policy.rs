//! Caller-controlled policies: item naming, cache retention and resume choice.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::download::sanitize_filename;
use crate::queue::Progress;

/// How a catalog entry's name becomes a task name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingPolicy {
    /// Keep the catalog's name.
    #[default]
    Original,
    /// Prefix the discovery unit, `0003_cat.jpg`.
    Sequenced,
}

impl NamingPolicy {
    /// Applies the policy; the result is always sanitized.
    #[must_use]
    pub fn apply(self, sequence_key: i64, name: &str) -> String {
        let name = sanitize_filename(name);
        match self {
            Self::Original => name,
            Self::Sequenced => format!("{sequence_key:04}_{name}"),
        }
    }
}

impl FromStr for NamingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(Self::Original),
            "sequenced" => Ok(Self::Sequenced),
            _ => Err(format!("invalid naming policy: {s} (expected original|sequenced)")),
        }
    }
}

/// What happens to the persisted store after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Delete only after a clean, complete run.
    #[default]
    Auto,
    /// Always keep.
    Keep,
    /// Delete unless the run was interrupted.
    Delete,
}

impl CachePolicy {
    /// Decides whether to delete the store.
    ///
    /// An interrupted run is never deleted, whatever the policy. `Auto` also
    /// keeps the store while anything failed or is still pending or in
    /// progress.
    #[must_use]
    pub fn should_delete(self, progress: &Progress, interrupted: bool) -> bool {
        if interrupted {
            return false;
        }
        match self {
            Self::Keep => false,
            Self::Delete => true,
            Self::Auto => progress.failed == 0 && progress.outstanding() == 0,
        }
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "keep" => Ok(Self::Keep),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("invalid cache policy: {s} (expected auto|keep|delete)")),
        }
    }
}

/// Answer to "a previous run left work behind, what now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeDecision {
    /// Reset in-progress tasks and continue.
    Resume,
    /// Discard the previous run.
    Fresh,
    /// Stop without doing anything.
    Abort,
}

impl fmt::Display for ResumeDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Resume => "resume",
            Self::Fresh => "fresh",
            Self::Abort => "abort",
        };
        write!(f, "{label}")
    }
}

impl FromStr for ResumeDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "fresh" => Ok(Self::Fresh),
            "abort" => Ok(Self::Abort),
            _ => Err(format!("invalid resume decision: {s} (expected resume|fresh|abort)")),
        }
    }
}

/// Chooses what to do with a previous run's state.
pub trait ResumeDecider: Send + Sync {
    /// Called with the stored progress when a previous run made headway.
    fn decide(&self, progress: &Progress) -> ResumeDecision;
}

/// A fixed decision, as given on the command line.
impl ResumeDecider for ResumeDecision {
    fn decide(&self, _progress: &Progress) -> ResumeDecision {
        *self
    }
}
