//! Episode repository: operations for the `episodes` table, including the
//! failure cascade run when a job terminates.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, Params};
use serde::Serialize;
use serde_json::{Map, Value};

use super::fields::{validate_percent, Assignment, AssignmentSet, EpisodeColumn};
use super::models::{now_timestamp, Episode, EpisodeStatus};
use super::transitions::{self, CascadeReason};
use super::{Database, DatabaseError};

/// Partial update for an episode. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpisodeUpdate {
    pub status: Option<EpisodeStatus>,
    pub progress_percent: Option<u8>,
    pub error_message: Option<String>,
    pub stage_data: Option<Map<String, Value>>,
    pub log_file: Option<String>,
}

impl EpisodeUpdate {
    pub fn status(status: EpisodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress_percent.is_none()
            && self.error_message.is_none()
            && self.stage_data.is_none()
            && self.log_file.is_none()
    }

    fn assignments(&self, now: &str) -> Result<AssignmentSet, DatabaseError> {
        let mut set = AssignmentSet::default();

        if let Some(percent) = self.progress_percent {
            validate_percent(EpisodeColumn::ProgressPercent.name(), percent)?;
            set.push(Assignment::set(
                EpisodeColumn::ProgressPercent.name(),
                SqlValue::Integer(i64::from(percent)),
            ));
        }
        if let Some(ref msg) = self.error_message {
            set.push(Assignment::set(
                EpisodeColumn::ErrorMessage.name(),
                SqlValue::Text(msg.clone()),
            ));
        }
        if let Some(ref data) = self.stage_data {
            set.push(Assignment::set(
                EpisodeColumn::StageData.name(),
                SqlValue::Text(serde_json::to_string(data)?),
            ));
        }
        if let Some(ref log_file) = self.log_file {
            set.push(Assignment::set(
                EpisodeColumn::LogFile.name(),
                SqlValue::Text(log_file.clone()),
            ));
        }
        if let Some(status) = self.status {
            set.push(Assignment::set(
                EpisodeColumn::Status.name(),
                SqlValue::Text(status.as_str().to_string()),
            ));
            transitions::apply(&mut set, transitions::episode_transition(status, now));
        }

        Ok(set)
    }
}

/// Per-status tally of a job's episodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EpisodeCounts {
    pub total: u64,
    pub complete: u64,
    pub failed: u64,
    /// Pending or in one of the working states.
    pub active: u64,
}

/// Inserts a pending episode for a job and returns its id.
pub fn create(
    db: &Database,
    job_id: i64,
    episode_number: i64,
    title: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO episodes (job_id, episode_number, title, status, progress_percent)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                job_id,
                episode_number,
                title,
                EpisodeStatus::Pending.as_str()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an episode by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<Episode>, DatabaseError> {
    db.with_conn(|conn| {
        let mut episodes =
            query_episodes(conn, "SELECT * FROM episodes WHERE id = ?1", params![id])?;
        Ok(episodes.pop())
    })
}

/// Lists a job's episodes by episode number.
pub fn list_for_job(db: &Database, job_id: i64) -> Result<Vec<Episode>, DatabaseError> {
    db.with_conn(|conn| {
        query_episodes(
            conn,
            "SELECT * FROM episodes WHERE job_id = ?1 ORDER BY episode_number ASC, id ASC",
            params![job_id],
        )
    })
}

/// Finds a job's episode by its number.
///
/// Numbers are not unique by schema; the earliest inserted match wins.
pub fn find_by_number(
    db: &Database,
    job_id: i64,
    episode_number: i64,
) -> Result<Option<Episode>, DatabaseError> {
    db.with_conn(|conn| {
        let mut episodes = query_episodes(
            conn,
            "SELECT * FROM episodes WHERE job_id = ?1 AND episode_number = ?2
             ORDER BY id ASC LIMIT 1",
            params![job_id, episode_number],
        )?;
        Ok(episodes.pop())
    })
}

/// Applies a partial update.
///
/// A status pulls in its transition writes: `complete` stamps
/// `finished_at` and forces 100%, working states stamp `started_at` on
/// first entry, `failed` stamps `finished_at`. An empty update is a no-op.
pub fn update(db: &Database, id: i64, update: &EpisodeUpdate) -> Result<(), DatabaseError> {
    if update.is_empty() {
        return Ok(());
    }
    let set = update.assignments(&now_timestamp())?;

    db.with_conn(|conn| {
        let changed = set.execute(conn, Episode::TABLE, id)?;
        if changed == 0 {
            log::warn!("Update of episode {} matched no row", id);
        }
        Ok(())
    })
}

/// Fails every episode of `job_id` that is not complete or failed.
///
/// Runs on the caller's connection so it shares the transaction of the
/// job status write that triggered it. Idempotent. Returns the number of
/// episodes changed.
pub(crate) fn fail_unfinished(
    conn: &Connection,
    job_id: i64,
    reason: CascadeReason<'_>,
    now: &str,
) -> Result<usize, DatabaseError> {
    let mut set = AssignmentSet::default();
    set.push(Assignment::set(
        EpisodeColumn::Status.name(),
        SqlValue::Text(EpisodeStatus::Failed.as_str().to_string()),
    ));
    set.push(Assignment::set(
        EpisodeColumn::ErrorMessage.name(),
        SqlValue::Text(reason.episode_message()),
    ));
    transitions::apply(
        &mut set,
        transitions::episode_transition(EpisodeStatus::Failed, now),
    );

    let changed = set.execute_where(
        conn,
        Episode::TABLE,
        "job_id = ? AND status NOT IN (?, ?)",
        &[
            &job_id,
            &EpisodeStatus::Complete.as_str(),
            &EpisodeStatus::Failed.as_str(),
        ],
    )?;
    if changed > 0 {
        log::debug!("Failed {} unfinished episodes of job {}", changed, job_id);
    }
    Ok(changed)
}

/// Runs the termination cascade for a job in its own transaction.
pub fn cascade_job_termination(
    db: &Database,
    job_id: i64,
    reason: CascadeReason<'_>,
) -> Result<usize, DatabaseError> {
    let now = now_timestamp();
    db.with_transaction(|tx| fail_unfinished(tx, job_id, reason, &now))
}

/// Tallies a job's episodes by status.
pub fn counts_for_job(db: &Database, job_id: i64) -> Result<EpisodeCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM episodes WHERE job_id = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![job_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = EpisodeCounts::default();
        for (status, n) in rows {
            counts.total += n;
            match status.parse::<EpisodeStatus>() {
                Ok(EpisodeStatus::Complete) => counts.complete += n,
                Ok(EpisodeStatus::Failed) => counts.failed += n,
                Ok(_) => counts.active += n,
                Err(e) => log::warn!("Job {}: {}", job_id, e),
            }
        }
        Ok(counts)
    })
}

fn query_episodes<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Episode>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut episodes = Vec::new();
    while let Some(row) = rows.next()? {
        episodes.push(Episode::from_row(row)?);
    }
    Ok(episodes)
}
