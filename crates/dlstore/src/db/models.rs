//! Typed rows and the closed enumerations persisted in them.
//!
//! Every enum carries an explicit `as_str`/`FromStr` pair; the strings
//! are part of the on-disk format and must not change.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::DatabaseError;

// ─── Timestamps ─────────────────────────────────────────────────────────────

/// Formats a timestamp for storage.
///
/// Fixed precision and a `Z` suffix keep text order equal to time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time in storage format.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn parse_timestamp(
    table: &'static str,
    id: i64,
    s: &str,
) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Rows written by the legacy implementation carry naive UTC
            // timestamps without an offset.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
        })
        .map_err(|e| DatabaseError::CorruptRow {
            table,
            id,
            reason: format!("bad timestamp '{}': {}", s, e),
        })
}

fn parse_opt_timestamp(
    table: &'static str,
    id: i64,
    s: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_timestamp(table, id, &s)).transpose()
}

/// Error returned when a persisted enum string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

// ─── JobStatus ──────────────────────────────────────────────────────────────

/// Overall status of a job.
///
/// `Queued → Running → {Success, Failed}` and `Queued | Running → Canceled`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Canceled,
}

impl JobStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// Queued or running: the poll queue.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "failed" => Ok(JobStatus::Failed),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(UnknownVariant {
                kind: "job status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── JobStage ───────────────────────────────────────────────────────────────

/// Coarse phase of job execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Init,
    Resolve,
    Download,
    Postprocess,
    Done,
}

impl JobStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobStage::Init => "init",
            JobStage::Resolve => "resolve",
            JobStage::Download => "download",
            JobStage::Postprocess => "postprocess",
            JobStage::Done => "done",
        }
    }

    /// Display percentage associated with entering this stage.
    pub const fn progress_percent(&self) -> u8 {
        match self {
            JobStage::Init => 5,
            JobStage::Resolve => 15,
            JobStage::Download => 30,
            JobStage::Postprocess => 95,
            JobStage::Done => 100,
        }
    }
}

impl FromStr for JobStage {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(JobStage::Init),
            "resolve" => Ok(JobStage::Resolve),
            "download" => Ok(JobStage::Download),
            "postprocess" => Ok(JobStage::Postprocess),
            "done" => Ok(JobStage::Done),
            other => Err(UnknownVariant {
                kind: "job stage",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── EpisodeStatus ──────────────────────────────────────────────────────────

/// Status of a single episode.
///
/// The working states are advisory; the store accepts them in any order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    GetStream,
    DownloadVideo,
    MergeVideo,
    DownloadSubtitles,
    Complete,
    Failed,
}

impl EpisodeStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::GetStream => "get_stream",
            EpisodeStatus::DownloadVideo => "download_video",
            EpisodeStatus::MergeVideo => "merge_video",
            EpisodeStatus::DownloadSubtitles => "download_subtitles",
            EpisodeStatus::Complete => "complete",
            EpisodeStatus::Failed => "failed",
        }
    }

    /// Short label for display.
    pub const fn label(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "Waiting",
            EpisodeStatus::GetStream => "Finding stream",
            EpisodeStatus::DownloadVideo => "Downloading",
            EpisodeStatus::MergeVideo => "Merging",
            EpisodeStatus::DownloadSubtitles => "Subtitles",
            EpisodeStatus::Complete => "Complete",
            EpisodeStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Complete | EpisodeStatus::Failed)
    }

    /// One of the active download steps between pending and complete.
    pub fn is_working(&self) -> bool {
        matches!(
            self,
            EpisodeStatus::GetStream
                | EpisodeStatus::DownloadVideo
                | EpisodeStatus::MergeVideo
                | EpisodeStatus::DownloadSubtitles
        )
    }
}

impl FromStr for EpisodeStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EpisodeStatus::Pending),
            "get_stream" => Ok(EpisodeStatus::GetStream),
            "download_video" => Ok(EpisodeStatus::DownloadVideo),
            "merge_video" => Ok(EpisodeStatus::MergeVideo),
            "download_subtitles" => Ok(EpisodeStatus::DownloadSubtitles),
            "complete" => Ok(EpisodeStatus::Complete),
            "failed" => Ok(EpisodeStatus::Failed),
            other => Err(UnknownVariant {
                kind: "episode status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn decode<T: FromStr<Err = UnknownVariant>>(
    table: &'static str,
    id: i64,
    s: &str,
) -> Result<T, DatabaseError> {
    s.parse().map_err(|e: UnknownVariant| DatabaseError::CorruptRow {
        table,
        id,
        reason: e.to_string(),
    })
}

fn decode_percent(table: &'static str, id: i64, raw: Option<i64>) -> Result<u8, DatabaseError> {
    let raw = raw.unwrap_or(0);
    u8::try_from(raw)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| DatabaseError::CorruptRow {
            table,
            id,
            reason: format!("progress_percent {} out of range", raw),
        })
}

// ─── Job ────────────────────────────────────────────────────────────────────

/// A job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub url: String,
    pub profile: Option<String>,
    pub extra_args: Option<String>,
    pub status: JobStatus,
    pub stage: Option<JobStage>,
    pub progress_percent: u8,
    pub progress_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub log_file: Option<String>,
    pub pid: Option<i64>,
}

impl Job {
    pub(crate) const TABLE: &'static str = "jobs";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let id: i64 = row.get("id")?;
        let status: String = row.get("status")?;
        let stage: Option<String> = row.get("stage")?;
        let created_at: String = row.get("created_at")?;

        Ok(Self {
            id,
            url: row.get("url")?,
            profile: row.get("profile")?,
            extra_args: row.get("extra_args")?,
            status: decode(Self::TABLE, id, &status)?,
            stage: stage
                .map(|s| decode(Self::TABLE, id, &s))
                .transpose()?,
            progress_percent: decode_percent(Self::TABLE, id, row.get("progress_percent")?)?,
            progress_text: row.get("progress_text")?,
            created_at: parse_timestamp(Self::TABLE, id, &created_at)?,
            started_at: parse_opt_timestamp(Self::TABLE, id, row.get("started_at")?)?,
            finished_at: parse_opt_timestamp(Self::TABLE, id, row.get("finished_at")?)?,
            error_message: row.get("error_message")?,
            log_file: row.get("log_file")?,
            pid: row.get("pid")?,
        })
    }
}

// ─── Episode ────────────────────────────────────────────────────────────────

/// An episode row, always owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub job_id: i64,
    pub episode_number: i64,
    pub title: String,
    pub status: EpisodeStatus,
    pub progress_percent: u8,
    /// Worker-defined metadata for the current step.
    pub stage_data: Option<Map<String, Value>>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub log_file: Option<String>,
}

impl Episode {
    pub(crate) const TABLE: &'static str = "episodes";

    pub(crate) fn from_row(row: &Row<'_>) -> Result<Self, DatabaseError> {
        let id: i64 = row.get("id")?;
        let status: String = row.get("status")?;
        let stage_data: Option<String> = row.get("stage_data")?;

        Ok(Self {
            id,
            job_id: row.get("job_id")?,
            episode_number: row.get("episode_number")?,
            title: row.get("title")?,
            status: decode(Self::TABLE, id, &status)?,
            progress_percent: decode_percent(Self::TABLE, id, row.get("progress_percent")?)?,
            stage_data: stage_data
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            error_message: row.get("error_message")?,
            started_at: parse_opt_timestamp(Self::TABLE, id, row.get("started_at")?)?,
            finished_at: parse_opt_timestamp(Self::TABLE, id, row.get("finished_at")?)?,
            log_file: row.get("log_file")?,
        })
    }
}
