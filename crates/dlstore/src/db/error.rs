//! Database error types.

use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    /// The database stayed busy or locked past the configured busy timeout.
    #[error("Database busy: {0}")]
    Busy(rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A field name outside the update allow-list.
    #[error("Invalid field name: '{field}'")]
    InvalidField { field: String },

    /// A known field with an unacceptable value.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// Encoding or decoding of stored JSON failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into its typed form.
    #[error("Corrupt row {id} in '{table}': {reason}")]
    CorruptRow {
        table: &'static str,
        id: i64,
        reason: String,
    },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// A blocking task running a store call panicked or was cancelled.
    #[error("Blocking task failed: {0}")]
    TaskJoin(String),
}

impl DatabaseError {
    /// Returns true when the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DatabaseError::Busy(_))
    }

    pub(crate) fn invalid_value(field: &str, reason: impl Into<String>) -> Self {
        DatabaseError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                DatabaseError::Busy(e)
            }
            _ => DatabaseError::Sqlite(e),
        }
    }
}
