//! Error types for queue operations.

use std::fmt;

use thiserror::Error;

use super::ItemId;
use crate::archive::ArchiveError;
use crate::db::DbError;
use crate::source::{SourceError, SourceId};

/// Structured classification for queue state store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out or is closed.
    Pool,
    /// Filesystem or transport IO failure.
    Io,
    /// A stored row could not be decoded into an item.
    Decode,
    /// Opening the database or running migrations failed.
    Open,
    /// Unclassified database failure.
    Other,
}

impl StoreErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Pool,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode,
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
            Self::Pool => "pool",
            Self::Io => "io",
            Self::Decode => "decode",
            Self::Open => "open",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StoreErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StoreErrorKind::BusyOrLocked;
    }

    StoreErrorKind::Other
}

/// A queue state store operation failed.
#[derive(Debug, Clone, Error)]
#[error("queue state store error ({kind}): {message}")]
pub struct StoreError {
    /// Typed classification.
    pub kind: StoreErrorKind,
    /// Human-readable error text.
    pub message: String,
}

impl StoreError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Decode,
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self {
            kind: StoreErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        Self {
            kind: StoreErrorKind::Open,
            message: err.to_string(),
        }
    }
}

/// Errors returned by [`QueueManager`](super::QueueManager) operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The source is already archived, or already waiting in the queue.
    #[error(
        "already downloaded or queued: {source_id}\n  Suggestion: Use --force to download it again"
    )]
    Duplicate {
        /// Identity that collided.
        source_id: SourceId,
    },

    /// Unknown item id, or the item is already terminal.
    #[error(
        "queue item not found: id {0}\n  Suggestion: The item may have finished already or the ID is incorrect"
    )]
    NotFound(ItemId),

    /// The request cannot be turned into a download.
    #[error("invalid download request: {0}")]
    InvalidRequest(#[from] SourceError),

    /// Concurrency outside the supported range.
    #[error(
        "invalid concurrency {value}: must be between {min} and {max}\n  Suggestion: Use a value between {min} and {max}"
    )]
    InvalidConcurrency {
        /// Requested value.
        value: usize,
        /// Smallest accepted value.
        min: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// Opening or writing the archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Opening or loading the queue state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_message_names_source_and_force() {
        let err = QueueError::Duplicate {
            source_id: SourceId::new("youtube", "dQw4w9WgXcQ"),
        };
        let msg = err.to_string();
        assert!(msg.contains("youtube dQw4w9WgXcQ"));
        assert!(msg.contains("--force"));
    }

    #[test]
    fn test_not_found_message() {
        let msg = QueueError::NotFound(42).to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("42"));
        assert!(msg.contains("Suggestion"));
    }

    #[test]
    fn test_invalid_concurrency_message_has_range() {
        let msg = QueueError::InvalidConcurrency {
            value: 0,
            min: 1,
            max: 16,
        }
        .to_string();
        assert!(msg.contains("between 1 and 16"));
    }

    #[test]
    fn test_store_error_from_sqlx_pool_closed() {
        let err = StoreError::from(sqlx::Error::PoolClosed);
        assert_eq!(err.kind, StoreErrorKind::Pool);
        assert!(err.to_string().contains("pool"));
    }
}
