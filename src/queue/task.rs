//! Task types, status definitions and aggregate progress.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;

/// Length of the hex task id.
const TASK_ID_LEN: usize = 32;

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by exactly one worker.
    InProgress,
    /// Downloaded successfully.
    Completed,
    /// Failed after all download attempts.
    Failed,
}

impl TaskStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// A discovered item ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    /// Discovery unit (page) the item came from.
    pub sequence_key: i64,
    /// Target filename, unique within the group.
    pub name: String,
    /// Opaque address handed to the item fetcher.
    pub source_locator: String,
    /// Byte-size hint for integrity checks.
    pub expected_size: Option<i64>,
}

impl NewTask {
    /// Creates a new task description.
    pub fn new(
        sequence_key: i64,
        name: impl Into<String>,
        source_locator: impl Into<String>,
        expected_size: Option<i64>,
    ) -> Self {
        Self {
            sequence_key,
            name: name.into(),
            source_locator: source_locator.into(),
            expected_size,
        }
    }
}

/// A single row of the task table.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    /// Unique identifier.
    pub id: String,
    /// Logical run this task belongs to.
    pub group_key: String,
    /// Ordering hint (discovery page number).
    pub sequence_key: i64,
    /// Target filename.
    pub name: String,
    /// Opaque address for the item fetcher.
    pub source_locator: String,
    /// Byte-size hint.
    pub expected_size: Option<i64>,
    /// Current status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Claiming worker; set iff in progress.
    pub owner: Option<String>,
    /// Download attempts recorded at failure.
    pub retry_count: i64,
    /// When the task was inserted.
    pub created_at: String,
    /// When the current owner claimed it.
    pub started_at: Option<String>,
    /// When it reached a terminal status.
    pub completed_at: Option<String>,
    /// Last download error message.
    pub last_error: Option<String>,
}

impl Task {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status_str.parse().unwrap_or(TaskStatus::Pending)
    }

    /// Expected size as unsigned bytes, when known.
    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.expected_size.and_then(|size| u64::try_from(size).ok())
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task {{ id: {}, name: {}, sequence: {}, status: {} }}",
            self.id,
            self.name,
            self.sequence_key,
            self.status()
        )
    }
}

/// Per-status counts for one group, computed on demand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
}

impl Progress {
    /// Tasks in a terminal status.
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.completed + self.failed
    }

    /// Tasks still waiting or being worked on.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.pending + self.in_progress
    }

    /// True when a previous run made some headway worth resuming.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.completed > 0 || self.in_progress > 0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} done ({} completed, {} failed, {} in progress, {} pending)",
            self.finished(),
            self.total,
            self.completed,
            self.failed,
            self.in_progress,
            self.pending
        )
    }
}

/// Derives a task id from its discovery coordinates.
///
/// Including the discovery timestamp keeps ids distinct when the same logical
/// item is discovered again in a later run.
#[must_use]
pub fn derive_task_id(
    group_key: &str,
    sequence_key: i64,
    name: &str,
    discovered_at_ms: u128,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(group_key.as_bytes());
    hasher.update(b"|");
    hasher.update(sequence_key.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(discovered_at_ms.to_string().as_bytes());

    let mut id: String = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();
    id.truncate(TASK_ID_LEN);
    id
}

/// Milliseconds since the Unix epoch (0 if the clock is before it).
#[must_use]
pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}
