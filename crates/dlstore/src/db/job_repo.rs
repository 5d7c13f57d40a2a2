//! Job repository: lifecycle operations for the `jobs` table.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, Params};
use serde::Serialize;
use serde_json::{Map, Value};

use super::episode_repo;
use super::fields::{Assignment, AssignmentSet, JobColumn, JobField};
use super::models::{now_timestamp, Job, JobStage, JobStatus};
use super::transitions::{self, CascadeReason};
use super::{Database, DatabaseError};

/// Result of a retention purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeOutcome {
    /// Jobs removed together with their episodes.
    pub deleted: u64,
    /// Running jobs left in place.
    pub skipped: u64,
}

/// Inserts a new queued job and returns its id.
pub fn create(
    db: &Database,
    url: &str,
    profile: Option<&str>,
    extra_args: Option<&str>,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (url, profile, extra_args, status, progress_percent, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                url,
                profile,
                extra_args,
                JobStatus::Queued.as_str(),
                now_timestamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let mut jobs = query_jobs(conn, "SELECT * FROM jobs WHERE id = ?1", params![id])?;
        Ok(jobs.pop())
    })
}

/// Lists jobs newest first.
pub fn list(db: &Database, limit: u32, offset: u32) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        query_jobs(
            conn,
            "SELECT * FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            params![limit, offset],
        )
    })
}

/// Lists queued and running jobs, oldest first.
pub fn active(db: &Database) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        query_jobs(
            conn,
            "SELECT * FROM jobs WHERE status IN (?1, ?2) ORDER BY created_at ASC, id ASC",
            params![JobStatus::Queued.as_str(), JobStatus::Running.as_str()],
        )
    })
}

/// Atomically moves a queued job to running.
///
/// A single conditional `UPDATE ... WHERE status = 'queued'`: of any number
/// of concurrent callers, exactly one sees a changed row. Returns `false`
/// if the job was already claimed, is terminal, or does not exist.
pub fn claim(db: &Database, id: i64) -> Result<bool, DatabaseError> {
    let now = now_timestamp();
    let mut set = AssignmentSet::default();
    set.push(Assignment::set(
        JobColumn::Status.name(),
        SqlValue::Text(JobStatus::Running.as_str().to_string()),
    ));
    transitions::apply(
        &mut set,
        transitions::job_transition(JobStatus::Running, &now).assignments,
    );

    db.with_conn(|conn| {
        let changed = set.execute_where(
            conn,
            Job::TABLE,
            "id = ? AND status = ?",
            &[&id, &JobStatus::Queued.as_str()],
        )?;
        if changed == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
                params![id],
                |r| r.get(0),
            )?;
            if !exists {
                log::warn!("Claim of job {} failed: no such job", id);
            }
        }
        Ok(changed == 1)
    })
}

/// Records the worker process for a freshly claimed job and enters the
/// `init` stage.
pub fn start(db: &Database, id: i64, pid: i64, log_file: &str) -> Result<(), DatabaseError> {
    update(
        db,
        id,
        &[
            JobField::Pid(Some(pid)),
            JobField::LogFile(Some(log_file.to_string())),
            JobField::Stage(Some(JobStage::Init)),
            JobField::ProgressPercent(JobStage::Init.progress_percent()),
        ],
    )
}

/// Updates progress fields. `stage` and `text` are left unchanged when absent.
pub fn update_progress(
    db: &Database,
    id: i64,
    percent: u8,
    stage: Option<JobStage>,
    text: Option<&str>,
) -> Result<(), DatabaseError> {
    let mut fields = vec![JobField::ProgressPercent(percent)];
    if let Some(stage) = stage {
        fields.push(JobField::Stage(Some(stage)));
    }
    if let Some(text) = text.filter(|t| !t.is_empty()) {
        fields.push(JobField::ProgressText(Some(text.to_string())));
    }
    update(db, id, &fields)
}

/// Applies a partial update from typed fields.
///
/// Every field is validated before any statement is built; a status field
/// may only name a terminal status. It pulls in its transition writes, and
/// a failing terminal status fails the job's unfinished episodes in the
/// same transaction. An empty slice is a no-op.
pub fn update(db: &Database, id: i64, fields: &[JobField]) -> Result<(), DatabaseError> {
    if fields.is_empty() {
        return Ok(());
    }
    for field in fields {
        field.validate()?;
    }

    let now = now_timestamp();
    let mut set = AssignmentSet::default();
    let mut status = None;
    let mut error_message = None;
    for field in fields {
        set.push(Assignment::set(field.column().name(), field.to_sql_value()));
        match field {
            JobField::Status(s) => status = Some(*s),
            JobField::ErrorMessage(msg) => error_message = msg.as_deref(),
            _ => {}
        }
    }

    let cascade = status.and_then(|status| {
        let transition = transitions::job_transition(status, &now);
        transitions::apply(&mut set, transition.assignments);
        transition.cascades.then_some(match status {
            JobStatus::Canceled => CascadeReason::Cancelled,
            _ => CascadeReason::JobFailed(error_message),
        })
    });

    db.with_transaction(|tx| {
        let changed = set.execute(tx, Job::TABLE, id)?;
        if changed == 0 {
            log::warn!("Update of job {} matched no row", id);
            return Ok(());
        }
        log::debug!("Updated job {} ({} fields)", id, fields.len());

        if let Some(reason) = cascade {
            episode_repo::fail_unfinished(tx, id, reason, &now)?;
        }
        Ok(())
    })
}

/// Applies a partial update from caller-supplied column names.
///
/// Names outside the allow-list are rejected with
/// [`DatabaseError::InvalidField`] before anything is written.
pub fn update_from_map(
    db: &Database,
    id: i64,
    fields: &Map<String, Value>,
) -> Result<(), DatabaseError> {
    let fields = JobField::parse_map(fields)?;
    update(db, id, &fields)
}

/// Marks a job finished.
///
/// Success forces `progress_percent = 100` and `stage = done`. Failure
/// also fails every unfinished episode. The status is not checked first;
/// calling this twice re-applies the update.
pub fn finish(
    db: &Database,
    id: i64,
    success: bool,
    error_message: Option<&str>,
) -> Result<(), DatabaseError> {
    let status = if success {
        JobStatus::Success
    } else {
        JobStatus::Failed
    };
    update(
        db,
        id,
        &[
            JobField::Status(status),
            JobField::ErrorMessage(error_message.map(str::to_string)),
        ],
    )
}

/// Cancels a job and fails every unfinished episode.
pub fn cancel(db: &Database, id: i64) -> Result<(), DatabaseError> {
    update(db, id, &[JobField::Status(JobStatus::Canceled)])
}

/// Deletes every job that is not running, with its episodes.
///
/// The count of skipped running jobs and the delete share one transaction.
pub fn purge_except_running(db: &Database) -> Result<PurgeOutcome, DatabaseError> {
    db.with_transaction(|tx| {
        let skipped: u64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![JobStatus::Running.as_str()],
            |r| r.get(0),
        )?;
        let deleted = tx.execute(
            "DELETE FROM jobs WHERE status != ?1",
            params![JobStatus::Running.as_str()],
        )?;
        Ok(PurgeOutcome {
            deleted: deleted as u64,
            skipped,
        })
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: JobStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

fn query_jobs<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut jobs = Vec::new();
    while let Some(row) = rows.next()? {
        jobs.push(Job::from_row(row)?);
    }
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn raw_row(db: &Database, id: i64) -> Vec<Option<String>> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
            let cols = stmt.column_count();
            let row = stmt.query_row(params![id], |r| {
                (0..cols)
                    .map(|i| {
                        r.get::<_, rusqlite::types::Value>(i)
                            .map(|v| match v {
                                SqlValue::Null => None,
                                other => Some(format!("{:?}", other)),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })?;
            Ok(row)
        })
        .unwrap()
    }

    #[test]
    fn test_create_and_find() {
        let db = test_db();
        let id = create(&db, "http://x", Some("hd"), Some("--fast")).unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.url, "http://x");
        assert_eq!(job.profile.as_deref(), Some("hd"));
        assert_eq!(job.extra_args.as_deref(), Some("--fast"));
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.stage, None);
        assert_eq!(job.progress_percent, 0);
        assert!(job.started_at.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        assert!(find_by_id(&db, 999).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first_with_pagination() {
        let db = test_db();
        let ids: Vec<i64> = (0..5)
            .map(|i| create(&db, &format!("http://x/{}", i), None, None).unwrap())
            .collect();

        let page = list(&db, 2, 0).unwrap();
        assert_eq!(page.iter().map(|j| j.id).collect::<Vec<_>>(), vec![ids[4], ids[3]]);

        let page = list(&db, 2, 4).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, ids[0]);
    }

    #[test]
    fn test_claim_once() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();

        assert!(claim(&db, id).unwrap());
        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        assert!(!claim(&db, id).unwrap());
    }

    #[test]
    fn test_claim_missing_or_terminal() {
        let db = test_db();
        assert!(!claim(&db, 42).unwrap());

        let id = create(&db, "http://x", None, None).unwrap();
        cancel(&db, id).unwrap();
        assert!(!claim(&db, id).unwrap());
        assert_eq!(find_by_id(&db, id).unwrap().unwrap().status, JobStatus::Canceled);
    }

    #[test]
    fn test_start_sets_init_stage() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        claim(&db, id).unwrap();
        start(&db, id, 4242, "/tmp/job.log").unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.pid, Some(4242));
        assert_eq!(job.log_file.as_deref(), Some("/tmp/job.log"));
        assert_eq!(job.stage, Some(JobStage::Init));
        assert_eq!(job.progress_percent, 5);
    }

    #[test]
    fn test_update_progress_leaves_absent_fields() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        update_progress(&db, id, 15, Some(JobStage::Resolve), Some("Resolving")).unwrap();
        update_progress(&db, id, 20, None, None).unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.progress_percent, 20);
        assert_eq!(job.stage, Some(JobStage::Resolve));
        assert_eq!(job.progress_text.as_deref(), Some("Resolving"));
    }

    #[test]
    fn test_update_progress_rejects_out_of_range() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        let err = update_progress(&db, id, 101, None, None).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { .. }));
        assert_eq!(find_by_id(&db, id).unwrap().unwrap().progress_percent, 0);
    }

    #[test]
    fn test_update_empty_map_is_noop() {
        let db = test_db();
        let id = create(&db, "http://x", Some("p"), None).unwrap();
        let before = raw_row(&db, id);

        update_from_map(&db, id, &Map::new()).unwrap();

        assert_eq!(raw_row(&db, id), before);
    }

    #[test]
    fn test_update_unknown_field_writes_nothing() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        let before = raw_row(&db, id);

        let fields = json!({ "progress_text": "half", "bogus_field": 1 });
        let err = update_from_map(&db, id, fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidField { ref field } if field == "bogus_field"));

        assert_eq!(raw_row(&db, id), before);
    }

    #[test]
    fn test_update_from_map_applies_fields() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        let fields = json!({ "progress_text": "half", "progress_percent": 50, "pid": 7 });
        update_from_map(&db, id, fields.as_object().unwrap()).unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.progress_text.as_deref(), Some("half"));
        assert_eq!(job.progress_percent, 50);
        assert_eq!(job.pid, Some(7));
    }

    #[test]
    fn test_update_rejects_requeue() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        claim(&db, id).unwrap();

        let err = update(&db, id, &[JobField::Status(JobStatus::Queued)]).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { .. }));
        assert_eq!(find_by_id(&db, id).unwrap().unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_update_cannot_revive_terminal_job() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        cancel(&db, id).unwrap();

        let err = update(&db, id, &[JobField::Status(JobStatus::Running)]).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { .. }));

        let fields = json!({ "status": "running" });
        let err = update_from_map(&db, id, fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { .. }));

        assert_eq!(find_by_id(&db, id).unwrap().unwrap().status, JobStatus::Canceled);
        assert!(active(&db).unwrap().is_empty());
    }

    #[test]
    fn test_finish_success() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        claim(&db, id).unwrap();
        finish(&db, id, true, None).unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.progress_percent, 100);
        assert_eq!(job.stage, Some(JobStage::Done));
        assert!(job.finished_at.is_some());
        assert!(job.error_message.is_none());
    }

    #[test]
    fn test_finish_failure_keeps_progress() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        claim(&db, id).unwrap();
        update_progress(&db, id, 30, Some(JobStage::Download), None).unwrap();
        finish(&db, id, false, Some("network down")).unwrap();

        let job = find_by_id(&db, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("network down"));
        assert_eq!(job.progress_percent, 30);
        assert_eq!(job.stage, Some(JobStage::Download));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_active_oldest_first() {
        let db = test_db();
        let a = create(&db, "http://a", None, None).unwrap();
        let b = create(&db, "http://b", None, None).unwrap();
        let c = create(&db, "http://c", None, None).unwrap();
        claim(&db, b).unwrap();
        finish(&db, c, true, None).unwrap();

        let ids: Vec<i64> = active(&db).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_purge_except_running() {
        let db = test_db();
        let running = create(&db, "http://a", None, None).unwrap();
        claim(&db, running).unwrap();
        let done = create(&db, "http://b", None, None).unwrap();
        finish(&db, done, true, None).unwrap();
        let queued = create(&db, "http://c", None, None).unwrap();

        let outcome = purge_except_running(&db).unwrap();
        assert_eq!(outcome, PurgeOutcome { deleted: 2, skipped: 1 });

        assert!(find_by_id(&db, running).unwrap().is_some());
        assert!(find_by_id(&db, done).unwrap().is_none());
        assert!(find_by_id(&db, queued).unwrap().is_none());
    }

    #[test]
    fn test_count_by_status() {
        let db = test_db();
        let a = create(&db, "http://a", None, None).unwrap();
        create(&db, "http://b", None, None).unwrap();
        claim(&db, a).unwrap();

        assert_eq!(count_by_status(&db, JobStatus::Queued).unwrap(), 1);
        assert_eq!(count_by_status(&db, JobStatus::Running).unwrap(), 1);
        assert_eq!(count_by_status(&db, JobStatus::Failed).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let db = test_db();
        let id = create(&db, "http://x", None, None).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE jobs SET status = 'paused' WHERE id = ?1", params![id])?;
            Ok(())
        })
        .unwrap();

        let err = find_by_id(&db, id).unwrap_err();
        assert!(matches!(err, DatabaseError::CorruptRow { table: "jobs", .. }));
    }
}
