//! Test harness for isolated store tests.
//!
//! Each harness owns a temporary directory holding one SQLite file, so
//! tests can open extra handles on the same database the way separate
//! worker processes would.

#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;

use dlstore::{Database, JobStore, StoreConfig};

pub struct TestHarness {
    /// Kept alive so the directory outlives every handle.
    temp_dir: TempDir,
    pub db_path: PathBuf,
    pub store: JobStore,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("jobs.db");
        let store = JobStore::open(&Self::config_for(&db_path)).expect("Failed to open store");

        Self {
            temp_dir,
            db_path,
            store,
        }
    }

    fn config_for(path: &std::path::Path) -> StoreConfig {
        StoreConfig {
            database_path: path.to_path_buf(),
            busy_timeout_ms: 10_000,
            ..StoreConfig::default()
        }
    }

    pub fn config(&self) -> StoreConfig {
        Self::config_for(&self.db_path)
    }

    /// Opens an independent connection to the same database file.
    pub fn open_handle(&self) -> Database {
        Database::open_with_config(&self.config()).expect("Failed to open second handle")
    }

    /// Opens an independent store on the same database file.
    pub fn open_store(&self) -> JobStore {
        JobStore::new(self.open_handle())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
