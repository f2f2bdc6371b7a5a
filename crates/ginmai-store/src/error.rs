use ginmai_shared::{Conflict, GinmaiError};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Input failed shape or range validation.
    #[error("{0}")]
    Validation(String),

    /// A business rule rejected the operation.
    #[error("{0}")]
    Conflict(#[from] Conflict),

    /// The caller lacks the identity or role the operation requires.
    #[error("{0}")]
    Unauthorized(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A shared handle was poisoned by a panicking holder.
    #[error("Database handle poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        StoreError::Validation(msg.into())
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        StoreError::Unauthorized(msg.into())
    }
}

impl From<StoreError> for GinmaiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => GinmaiError::NotFound(format!("{what} not found")),
            StoreError::Validation(msg) => GinmaiError::Validation(msg),
            StoreError::Conflict(c) => GinmaiError::Conflict(c),
            StoreError::Unauthorized(msg) => GinmaiError::Unauthorized(msg),
            StoreError::Sqlite(e) => {
                tracing::warn!(error = %e, "store operation failed");
                GinmaiError::Unavailable("the moment store is temporarily unavailable".into())
            }
            other => {
                tracing::error!(error = %other, "store failure");
                GinmaiError::Unavailable(other.to_string())
            }
        }
    }
}

/// Whether a SQLite error is a UNIQUE (or partial unique index) violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
