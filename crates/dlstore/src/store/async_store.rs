//! Async facade over [`JobStore`].
//!
//! SQLite calls block, so each operation runs on tokio's blocking pool.

use serde_json::{Map, Value};
use tokio::task;

use super::JobStore;
use crate::config::StoreConfig;
use crate::db::episode_repo::{EpisodeCounts, EpisodeUpdate};
use crate::db::fields::JobField;
use crate::db::job_repo::PurgeOutcome;
use crate::db::{DatabaseError, Episode, Job, JobStage};

#[derive(Clone)]
pub struct AsyncJobStore {
    inner: JobStore,
}

impl AsyncJobStore {
    pub fn new(inner: JobStore) -> Self {
        Self { inner }
    }

    /// Opens the store on the blocking pool.
    pub async fn open(config: StoreConfig) -> Result<Self, DatabaseError> {
        task::spawn_blocking(move || JobStore::open(&config))
            .await
            .map_err(|e| DatabaseError::TaskJoin(e.to_string()))?
            .map(Self::new)
    }

    /// Returns the synchronous store sharing this store's connection.
    pub fn blocking(&self) -> &JobStore {
        &self.inner
    }

    async fn run<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&JobStore) -> Result<T, DatabaseError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.inner.clone();
        task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DatabaseError::TaskJoin(e.to_string()))?
    }

    pub async fn create_job(
        &self,
        url: String,
        profile: Option<String>,
        extra_args: Option<String>,
    ) -> Result<i64, DatabaseError> {
        self.run(move |s| s.create_job(&url, profile.as_deref(), extra_args.as_deref()))
            .await
    }

    pub async fn get_job(&self, id: i64) -> Result<Option<Job>, DatabaseError> {
        self.run(move |s| s.get_job(id)).await
    }

    pub async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Vec<Job>, DatabaseError> {
        self.run(move |s| s.list_jobs(limit, offset)).await
    }

    pub async fn active_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        self.run(|s| s.active_jobs()).await
    }

    pub async fn claim_job(&self, id: i64) -> Result<bool, DatabaseError> {
        self.run(move |s| s.claim_job(id)).await
    }

    pub async fn start_job(
        &self,
        id: i64,
        pid: i64,
        log_file: String,
    ) -> Result<(), DatabaseError> {
        self.run(move |s| s.start_job(id, pid, &log_file)).await
    }

    pub async fn update_job_progress(
        &self,
        id: i64,
        percent: u8,
        stage: Option<JobStage>,
        text: Option<String>,
    ) -> Result<(), DatabaseError> {
        self.run(move |s| s.update_job_progress(id, percent, stage, text.as_deref()))
            .await
    }

    pub async fn update_job(&self, id: i64, fields: Vec<JobField>) -> Result<(), DatabaseError> {
        self.run(move |s| s.update_job(id, &fields)).await
    }

    pub async fn update_job_fields(
        &self,
        id: i64,
        fields: Map<String, Value>,
    ) -> Result<(), DatabaseError> {
        self.run(move |s| s.update_job_fields(id, &fields)).await
    }

    pub async fn finish_job(
        &self,
        id: i64,
        success: bool,
        error_message: Option<String>,
    ) -> Result<(), DatabaseError> {
        self.run(move |s| s.finish_job(id, success, error_message.as_deref()))
            .await
    }

    pub async fn cancel_job(&self, id: i64) -> Result<(), DatabaseError> {
        self.run(move |s| s.cancel_job(id)).await
    }

    pub async fn purge_except_running(&self) -> Result<PurgeOutcome, DatabaseError> {
        self.run(|s| s.purge_except_running()).await
    }

    pub async fn create_episode(
        &self,
        job_id: i64,
        episode_number: i64,
        title: String,
    ) -> Result<i64, DatabaseError> {
        self.run(move |s| s.create_episode(job_id, episode_number, &title)).await
    }

    pub async fn get_episode(&self, id: i64) -> Result<Option<Episode>, DatabaseError> {
        self.run(move |s| s.get_episode(id)).await
    }

    pub async fn list_episodes(&self, job_id: i64) -> Result<Vec<Episode>, DatabaseError> {
        self.run(move |s| s.list_episodes(job_id)).await
    }

    pub async fn find_episode(
        &self,
        job_id: i64,
        episode_number: i64,
    ) -> Result<Option<Episode>, DatabaseError> {
        self.run(move |s| s.find_episode(job_id, episode_number)).await
    }

    pub async fn update_episode(&self, id: i64, update: EpisodeUpdate) -> Result<(), DatabaseError> {
        self.run(move |s| s.update_episode(id, &update)).await
    }

    pub async fn episode_counts(&self, job_id: i64) -> Result<EpisodeCounts, DatabaseError> {
        self.run(move |s| s.episode_counts(job_id)).await
    }
}
