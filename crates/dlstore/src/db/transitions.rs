//! Status transition tables.
//!
//! Setting a status implies writes to other columns (timestamps, forced
//! percentages). Both tables live here and every code path that writes a
//! status goes through them.

use rusqlite::types::Value as SqlValue;

use super::fields::{Assignment, AssignmentSet, EpisodeColumn, JobColumn};
use super::models::{EpisodeStatus, JobStage, JobStatus};

/// Message written to episodes left unfinished by a cancelled job.
pub const CANCELLED_EPISODE_MESSAGE: &str = "Job was cancelled";

/// Why a job's unfinished episodes are being failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeReason<'a> {
    Cancelled,
    /// The job failed, optionally with its own error message.
    JobFailed(Option<&'a str>),
}

impl CascadeReason<'_> {
    /// Error message stored on each affected episode.
    pub fn episode_message(&self) -> String {
        match self {
            CascadeReason::Cancelled => CANCELLED_EPISODE_MESSAGE.to_string(),
            CascadeReason::JobFailed(Some(msg)) => format!("Job failed: {}", msg),
            CascadeReason::JobFailed(None) => "Job failed".to_string(),
        }
    }
}

/// What entering a job status implies.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub assignments: Vec<Assignment>,
    /// Whether unfinished episodes must be failed in the same transaction.
    pub cascades: bool,
}

/// Transition table for jobs, keyed by the status being entered.
pub fn job_transition(status: JobStatus, now: &str) -> JobTransition {
    let stamp = || SqlValue::Text(now.to_string());
    match status {
        JobStatus::Queued => JobTransition {
            assignments: vec![],
            cascades: false,
        },
        JobStatus::Running => JobTransition {
            assignments: vec![Assignment::set_if_null(JobColumn::StartedAt.name(), stamp())],
            cascades: false,
        },
        JobStatus::Success => JobTransition {
            assignments: vec![
                Assignment::set(JobColumn::FinishedAt.name(), stamp()),
                Assignment::set(
                    JobColumn::ProgressPercent.name(),
                    SqlValue::Integer(i64::from(JobStage::Done.progress_percent())),
                ),
                Assignment::set(
                    JobColumn::Stage.name(),
                    SqlValue::Text(JobStage::Done.as_str().to_string()),
                ),
            ],
            cascades: false,
        },
        JobStatus::Failed | JobStatus::Canceled => JobTransition {
            assignments: vec![Assignment::set(JobColumn::FinishedAt.name(), stamp())],
            cascades: true,
        },
    }
}

/// Transition table for episodes, keyed by the status being entered.
pub fn episode_transition(status: EpisodeStatus, now: &str) -> Vec<Assignment> {
    let stamp = || SqlValue::Text(now.to_string());
    match status {
        EpisodeStatus::Pending => vec![],
        EpisodeStatus::GetStream
        | EpisodeStatus::DownloadVideo
        | EpisodeStatus::MergeVideo
        | EpisodeStatus::DownloadSubtitles => {
            vec![Assignment::set_if_null(EpisodeColumn::StartedAt.name(), stamp())]
        }
        EpisodeStatus::Complete => vec![
            Assignment::set(EpisodeColumn::FinishedAt.name(), stamp()),
            Assignment::set(EpisodeColumn::ProgressPercent.name(), SqlValue::Integer(100)),
        ],
        EpisodeStatus::Failed => vec![Assignment::set(EpisodeColumn::FinishedAt.name(), stamp())],
    }
}

/// Applies implied writes on top of caller-supplied ones.
///
/// Forced writes replace caller values; first-entry writes (`set_if_null`)
/// yield to an explicit caller value for the same column.
pub(crate) fn apply(set: &mut AssignmentSet, implied: Vec<Assignment>) {
    for assignment in implied {
        if assignment.only_if_null {
            set.push_default(assignment);
        } else {
            set.push(assignment);
        }
    }
}
