//! Job store facade used by producers, workers and readers.
//!
//! `JobStore` is a thin layer over the repositories: every method runs in
//! its own span and state transitions are logged at `info`.

use serde_json::{Map, Value};
use tracing::{info, info_span, warn};

use crate::config::StoreConfig;
use crate::db::episode_repo::{self, EpisodeCounts, EpisodeUpdate};
use crate::db::fields::JobField;
use crate::db::job_repo::{self, PurgeOutcome};
use crate::db::{Database, DatabaseError, Episode, Job, JobStage};

pub mod async_store;

pub use async_store::AsyncJobStore;

/// Persistent store of download jobs and their episodes.
///
/// Cloning shares the underlying connection.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Opens the database described by `config`, running pending migrations.
    pub fn open(config: &StoreConfig) -> Result<Self, DatabaseError> {
        let _span = info_span!("store.open", path = %config.database_path.display()).entered();
        Ok(Self::new(Database::open_with_config(config)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Returns the underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // ─── Jobs ───────────────────────────────────────────────────────────────

    pub fn create_job(
        &self,
        url: &str,
        profile: Option<&str>,
        extra_args: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let _span = info_span!("store.create_job").entered();
        let id = job_repo::create(&self.db, url, profile, extra_args)?;
        info!(job_id = id, "Job queued for {}", url);
        Ok(id)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>, DatabaseError> {
        let _span = info_span!("store.get_job", job_id = id).entered();
        job_repo::find_by_id(&self.db, id)
    }

    /// Lists jobs newest first.
    pub fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, DatabaseError> {
        let _span = info_span!("store.list_jobs", limit, offset).entered();
        job_repo::list(&self.db, limit, offset)
    }

    /// Queued and running jobs, oldest first.
    pub fn active_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let _span = info_span!("store.active_jobs").entered();
        job_repo::active(&self.db)
    }

    /// Atomically moves a queued job to running.
    ///
    /// Returns `false` when another caller claimed it first, or the job is
    /// not queued or does not exist.
    pub fn claim_job(&self, id: i64) -> Result<bool, DatabaseError> {
        let _span = info_span!("store.claim_job", job_id = id).entered();
        let claimed = job_repo::claim(&self.db, id)?;
        if claimed {
            info!(job_id = id, "Job claimed");
        }
        Ok(claimed)
    }

    pub fn start_job(&self, id: i64, pid: i64, log_file: &str) -> Result<(), DatabaseError> {
        let _span = info_span!("store.start_job", job_id = id, pid).entered();
        job_repo::start(&self.db, id, pid, log_file)?;
        info!(job_id = id, pid, "Job started");
        Ok(())
    }

    pub fn update_job_progress(
        &self,
        id: i64,
        percent: u8,
        stage: Option<JobStage>,
        text: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let _span = info_span!("store.update_job_progress", job_id = id, percent).entered();
        job_repo::update_progress(&self.db, id, percent, stage, text)
    }

    pub fn update_job(&self, id: i64, fields: &[JobField]) -> Result<(), DatabaseError> {
        let _span = info_span!("store.update_job", job_id = id).entered();
        job_repo::update(&self.db, id, fields)
    }

    /// Applies a field map whose names must all be updatable job columns.
    pub fn update_job_fields(
        &self,
        id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), DatabaseError> {
        let _span = info_span!("store.update_job_fields", job_id = id).entered();
        job_repo::update_from_map(&self.db, id, fields).inspect_err(|e| {
            if matches!(e, DatabaseError::InvalidField { .. }) {
                warn!(job_id = id, "Rejected job update: {}", e);
            }
        })
    }

    /// Marks a job succeeded or failed. Failure also fails its unfinished
    /// episodes.
    pub fn finish_job(
        &self,
        id: i64,
        success: bool,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let _span = info_span!("store.finish_job", job_id = id, success).entered();
        job_repo::finish(&self.db, id, success, error_message)?;
        if success {
            info!(job_id = id, "Job finished");
        } else {
            info!(
                job_id = id,
                "Job failed: {}",
                error_message.unwrap_or("no error message")
            );
        }
        Ok(())
    }

    pub fn cancel_job(&self, id: i64) -> Result<(), DatabaseError> {
        let _span = info_span!("store.cancel_job", job_id = id).entered();
        job_repo::cancel(&self.db, id)?;
        info!(job_id = id, "Job cancelled");
        Ok(())
    }

    /// Deletes every job that is not running, along with its episodes.
    pub fn purge_except_running(&self) -> Result<PurgeOutcome, DatabaseError> {
        let _span = info_span!("store.purge_except_running").entered();
        let outcome = job_repo::purge_except_running(&self.db)?;
        info!(
            deleted = outcome.deleted,
            skipped = outcome.skipped,
            "Purged finished and queued jobs"
        );
        Ok(outcome)
    }

    // ─── Episodes ───────────────────────────────────────────────────────────

    pub fn create_episode(
        &self,
        job_id: i64,
        episode_number: i64,
        title: &str,
    ) -> Result<i64, DatabaseError> {
        let _span = info_span!("store.create_episode", job_id, episode_number).entered();
        episode_repo::create(&self.db, job_id, episode_number, title)
    }

    pub fn get_episode(&self, id: i64) -> Result<Option<Episode>, DatabaseError> {
        let _span = info_span!("store.get_episode", episode_id = id).entered();
        episode_repo::find_by_id(&self.db, id)
    }

    /// Episodes of a job ordered by episode number.
    pub fn list_episodes(&self, job_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        let _span = info_span!("store.list_episodes", job_id).entered();
        episode_repo::list_for_job(&self.db, job_id)
    }

    pub fn find_episode(
        &self,
        job_id: i64,
        episode_number: i64,
    ) -> Result<Option<Episode>, DatabaseError> {
        let _span = info_span!("store.find_episode", job_id, episode_number).entered();
        episode_repo::find_by_number(&self.db, job_id, episode_number)
    }

    pub fn update_episode(&self, id: i64, update: &EpisodeUpdate) -> Result<(), DatabaseError> {
        let _span = info_span!("store.update_episode", episode_id = id).entered();
        episode_repo::update(&self.db, id, update)?;
        if let Some(status) = update.status.filter(|s| s.is_terminal()) {
            info!(episode_id = id, "Episode {}", status.label().to_lowercase());
        }
        Ok(())
    }

    pub fn episode_counts(&self, job_id: i64) -> Result<EpisodeCounts, DatabaseError> {
        let _span = info_span!("store.episode_counts", job_id).entered();
        episode_repo::counts_for_job(&self.db, job_id)
    }
}
