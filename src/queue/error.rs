//! Error types for task store operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;

/// Structured classification for store/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl StoreErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

// Primary and extended result codes: BUSY(5), LOCKED(6), BUSY_RECOVERY(261),
// LOCKED_SHAREDCACHE(262), BUSY_SNAPSHOT(517), BUSY_TIMEOUT(773).
const BUSY_CODES: &[&str] = &[
    "SQLITE_BUSY",
    "SQLITE_LOCKED",
    "5",
    "6",
    "261",
    "262",
    "517",
    "773",
];

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreErrorKind {
    let code = database_error.code();
    if code
        .as_deref()
        .is_some_and(|value| BUSY_CODES.contains(&value))
    {
        return StoreErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return StoreErrorKind::BusyOrLocked;
    }

    StoreErrorKind::Other
}

/// Errors that can occur during task store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store file could not be created, opened or migrated.
    #[error(
        "cannot open task store at {}: {message}\n  Suggestion: Check that the cache directory is writable",
        .path.display()
    )]
    Open {
        /// Store file that failed to open.
        path: PathBuf,
        /// Underlying failure text.
        message: String,
    },

    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used for retry decisions.
        kind: StoreErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// Contention persisted past the retry ceiling.
    #[error("{operation} still busy after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Store operation that kept hitting contention.
        operation: &'static str,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last busy error text.
        message: String,
    },

    /// The task is not currently claimed, so it cannot be marked.
    #[error(
        "task {0} is not in progress\n  Suggestion: Only the worker that claimed a task may record its outcome"
    )]
    TaskNotClaimed(String),

    /// Filesystem failure while removing persisted state.
    #[error("IO error at {}: {message}", .path.display())]
    Io {
        /// Path being operated on.
        path: PathBuf,
        /// Underlying failure text.
        message: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Wraps a connection/migration failure as a fatal open error.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, source: &DbError) -> Self {
        Self::Open {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Wraps an IO failure.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::Open { .. }
            | Self::RetryExhausted { .. }
            | Self::TaskNotClaimed(_)
            | Self::Io { .. } => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition.
    #[must_use]
    pub fn is_busy_or_locked(&self) -> bool {
        self.database_kind() == Some(StoreErrorKind::BusyOrLocked)
    }

    /// Returns true when the busy retry budget was spent.
    #[must_use]
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}
