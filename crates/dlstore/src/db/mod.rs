//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access within one handle is serialized through a `Mutex<Connection>`.
//! Separate handles (other threads or processes) coordinate through
//! SQLite's own locking, bounded by the configured busy timeout.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::config::{JournalMode, StoreConfig};

pub mod episode_repo;
pub mod error;
pub mod fields;
pub mod job_repo;
pub mod migrations;
pub mod models;
pub mod transitions;

pub use error::DatabaseError;
pub use models::{Episode, EpisodeStatus, Job, JobStage, JobStatus};

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database at the given path with default
    /// settings and runs all pending migrations.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let config = StoreConfig {
            database_path: path.to_path_buf(),
            ..StoreConfig::default()
        };
        Self::open_with_config(&config)
    }

    /// Opens (or creates) the database described by `config` and runs all
    /// pending migrations.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self, DatabaseError> {
        let path = &config.database_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut conn = Connection::open(path)?;
        // Busy timeout first, so the pragmas below already wait on contention.
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.as_pragma(),
            |r| r.get(0),
        )?;
        log::debug!("SQLite journal mode: {}", mode);
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Provides locked access to the underlying connection.
    ///
    /// Each statement runs in its own implicit transaction.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front, so a read inside `f` can never be
    /// invalidated by another writer before `f`'s writes land. The
    /// transaction commits if `f` returns `Ok` and rolls back otherwise.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, DatabaseError>,
    {
        let mut conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl JournalMode {
    fn as_pragma(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
        }
    }
}

/// Returns the canonical database path: `~/.dlstore/data/jobs.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".dlstore").join("data").join("jobs.db"))
}
