pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod store;

pub use config::{load_config, JournalMode, StoreConfig};
pub use db::episode_repo::{EpisodeCounts, EpisodeUpdate};
pub use db::fields::{EpisodeColumn, JobColumn, JobField};
pub use db::job_repo::PurgeOutcome;
pub use db::{Database, DatabaseError, Episode, EpisodeStatus, Job, JobStage, JobStatus};
pub use error::{ConfigError, DlStoreError, Result};
pub use store::{AsyncJobStore, JobStore};
