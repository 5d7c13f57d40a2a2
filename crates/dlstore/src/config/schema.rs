use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;

/// SQLite journal mode used for file databases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log: readers never block the writer.
    #[default]
    Wal,
    /// Rollback journal, for filesystems without shared-memory support.
    Delete,
}

/// Settings for opening the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file.
    pub database_path: PathBuf,
    /// How long a statement waits on a locked database before failing
    /// with a retryable error.
    pub busy_timeout_ms: u64,
    pub journal_mode: JournalMode,
}

impl StoreConfig {
    pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path().unwrap_or_else(|| PathBuf::from("jobs.db")),
            busy_timeout_ms: Self::DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
        }
    }
}
