//! Allow-listed update fields.
//!
//! Column names used in dynamically built `UPDATE` statements only ever
//! come from the `name()` methods of the column enums here, never from
//! caller input.
//! Caller-supplied names are matched against this closed set first and
//! rejected before any statement exists.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::ToSql;
use serde_json::{Map, Value};

use super::models::{format_timestamp, JobStage, JobStatus};
use super::DatabaseError;

/// A job column that may be written through a generic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobColumn {
    Url,
    Profile,
    ExtraArgs,
    Status,
    Stage,
    ProgressPercent,
    ProgressText,
    CreatedAt,
    StartedAt,
    FinishedAt,
    ErrorMessage,
    LogFile,
    Pid,
}

impl JobColumn {
    pub const ALL: [JobColumn; 13] = [
        JobColumn::Url,
        JobColumn::Profile,
        JobColumn::ExtraArgs,
        JobColumn::Status,
        JobColumn::Stage,
        JobColumn::ProgressPercent,
        JobColumn::ProgressText,
        JobColumn::CreatedAt,
        JobColumn::StartedAt,
        JobColumn::FinishedAt,
        JobColumn::ErrorMessage,
        JobColumn::LogFile,
        JobColumn::Pid,
    ];

    pub const fn name(&self) -> &'static str {
        match self {
            JobColumn::Url => "url",
            JobColumn::Profile => "profile",
            JobColumn::ExtraArgs => "extra_args",
            JobColumn::Status => "status",
            JobColumn::Stage => "stage",
            JobColumn::ProgressPercent => "progress_percent",
            JobColumn::ProgressText => "progress_text",
            JobColumn::CreatedAt => "created_at",
            JobColumn::StartedAt => "started_at",
            JobColumn::FinishedAt => "finished_at",
            JobColumn::ErrorMessage => "error_message",
            JobColumn::LogFile => "log_file",
            JobColumn::Pid => "pid",
        }
    }
}

impl FromStr for JobColumn {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobColumn::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| DatabaseError::InvalidField {
                field: s.to_string(),
            })
    }
}

/// A typed value for one job column.
#[derive(Debug, Clone, PartialEq)]
pub enum JobField {
    Url(String),
    Profile(Option<String>),
    ExtraArgs(Option<String>),
    Status(JobStatus),
    Stage(Option<JobStage>),
    ProgressPercent(u8),
    ProgressText(Option<String>),
    CreatedAt(DateTime<Utc>),
    StartedAt(Option<DateTime<Utc>>),
    FinishedAt(Option<DateTime<Utc>>),
    ErrorMessage(Option<String>),
    LogFile(Option<String>),
    Pid(Option<i64>),
}

impl JobField {
    pub fn column(&self) -> JobColumn {
        match self {
            JobField::Url(_) => JobColumn::Url,
            JobField::Profile(_) => JobColumn::Profile,
            JobField::ExtraArgs(_) => JobColumn::ExtraArgs,
            JobField::Status(_) => JobColumn::Status,
            JobField::Stage(_) => JobColumn::Stage,
            JobField::ProgressPercent(_) => JobColumn::ProgressPercent,
            JobField::ProgressText(_) => JobColumn::ProgressText,
            JobField::CreatedAt(_) => JobColumn::CreatedAt,
            JobField::StartedAt(_) => JobColumn::StartedAt,
            JobField::FinishedAt(_) => JobColumn::FinishedAt,
            JobField::ErrorMessage(_) => JobColumn::ErrorMessage,
            JobField::LogFile(_) => JobColumn::LogFile,
            JobField::Pid(_) => JobColumn::Pid,
        }
    }

    /// Checks value-level constraints that the type alone does not carry.
    pub fn validate(&self) -> Result<(), DatabaseError> {
        match self {
            JobField::ProgressPercent(p) => validate_percent(JobColumn::ProgressPercent.name(), *p),
            JobField::Status(JobStatus::Queued) => Err(DatabaseError::invalid_value(
                JobColumn::Status.name(),
                "a job never re-enters queued",
            )),
            // Only claim moves a job into running.
            JobField::Status(JobStatus::Running) => Err(DatabaseError::invalid_value(
                JobColumn::Status.name(),
                "running is only entered by claiming a queued job",
            )),
            _ => Ok(()),
        }
    }

    /// Parses one caller-supplied `(name, value)` pair.
    ///
    /// Unknown names fail with [`DatabaseError::InvalidField`]; known names
    /// with a value of the wrong shape fail with
    /// [`DatabaseError::InvalidValue`].
    pub fn parse(name: &str, value: &Value) -> Result<Self, DatabaseError> {
        let column: JobColumn = name.parse()?;
        let field = column.name();
        let parsed = match column {
            JobColumn::Url => JobField::Url(required_string(field, value)?),
            JobColumn::Profile => JobField::Profile(optional_string(field, value)?),
            JobColumn::ExtraArgs => JobField::ExtraArgs(optional_string(field, value)?),
            JobColumn::Status => JobField::Status(parse_enum(field, &required_string(field, value)?)?),
            JobColumn::Stage => JobField::Stage(
                optional_string(field, value)?
                    .map(|s| parse_enum(field, &s))
                    .transpose()?,
            ),
            JobColumn::ProgressPercent => JobField::ProgressPercent(percent_value(field, value)?),
            JobColumn::ProgressText => JobField::ProgressText(optional_string(field, value)?),
            JobColumn::CreatedAt => JobField::CreatedAt(
                parse_datetime(field, &required_string(field, value)?)?,
            ),
            JobColumn::StartedAt => JobField::StartedAt(optional_datetime(field, value)?),
            JobColumn::FinishedAt => JobField::FinishedAt(optional_datetime(field, value)?),
            JobColumn::ErrorMessage => JobField::ErrorMessage(optional_string(field, value)?),
            JobColumn::LogFile => JobField::LogFile(optional_string(field, value)?),
            JobColumn::Pid => JobField::Pid(optional_integer(field, value)?),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parses a whole field map. Nothing is returned unless every entry is valid.
    pub fn parse_map(map: &Map<String, Value>) -> Result<Vec<JobField>, DatabaseError> {
        // Names first, so an unknown column is reported even when another
        // entry also carries a bad value.
        for name in map.keys() {
            name.parse::<JobColumn>()?;
        }
        map.iter()
            .map(|(name, value)| JobField::parse(name, value))
            .collect()
    }

    pub(crate) fn to_sql_value(&self) -> SqlValue {
        match self {
            JobField::Url(s) => SqlValue::Text(s.clone()),
            JobField::Status(s) => SqlValue::Text(s.as_str().to_string()),
            JobField::Stage(s) => opt_text(s.map(|s| s.as_str().to_string())),
            JobField::ProgressPercent(p) => SqlValue::Integer(i64::from(*p)),
            JobField::Profile(s)
            | JobField::ExtraArgs(s)
            | JobField::ProgressText(s)
            | JobField::ErrorMessage(s)
            | JobField::LogFile(s) => opt_text(s.clone()),
            JobField::CreatedAt(dt) => SqlValue::Text(format_timestamp(*dt)),
            JobField::StartedAt(dt) | JobField::FinishedAt(dt) => {
                opt_text(dt.map(format_timestamp))
            }
            JobField::Pid(p) => p.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
        }
    }
}

/// An episode column written by the store.
///
/// Episodes have no generic update; this set names every column
/// [`EpisodeUpdate`](super::episode_repo::EpisodeUpdate) and the status
/// transition table can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpisodeColumn {
    Status,
    ProgressPercent,
    ErrorMessage,
    StageData,
    LogFile,
    StartedAt,
    FinishedAt,
}

impl EpisodeColumn {
    pub const fn name(&self) -> &'static str {
        match self {
            EpisodeColumn::Status => "status",
            EpisodeColumn::ProgressPercent => "progress_percent",
            EpisodeColumn::ErrorMessage => "error_message",
            EpisodeColumn::StageData => "stage_data",
            EpisodeColumn::LogFile => "log_file",
            EpisodeColumn::StartedAt => "started_at",
            EpisodeColumn::FinishedAt => "finished_at",
        }
    }
}

/// One `column = value` assignment, plus whether it only applies to a NULL column.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: &'static str,
    pub value: SqlValue,
    pub only_if_null: bool,
}

impl Assignment {
    pub fn set(column: &'static str, value: SqlValue) -> Self {
        Self {
            column,
            value,
            only_if_null: false,
        }
    }

    pub fn set_if_null(column: &'static str, value: SqlValue) -> Self {
        Self {
            column,
            value,
            only_if_null: true,
        }
    }
}

/// Ordered assignments for one `UPDATE` statement.
///
/// Later assignments to the same column replace earlier ones.
#[derive(Debug, Default, Clone)]
pub(crate) struct AssignmentSet {
    items: Vec<Assignment>,
}

impl AssignmentSet {
    pub fn push(&mut self, assignment: Assignment) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|a| a.column == assignment.column)
        {
            *existing = assignment;
        } else {
            self.items.push(assignment);
        }
    }

    /// Adds the assignment only if the column is not already assigned.
    pub fn push_default(&mut self, assignment: Assignment) {
        if !self.items.iter().any(|a| a.column == assignment.column) {
            self.items.push(assignment);
        }
    }

    #[cfg(test)]
    pub fn get(&self, column: &str) -> Option<&Assignment> {
        self.items.iter().find(|a| a.column == column)
    }

    /// Executes the update against `table` for row `id`.
    /// Returns the number of rows affected.
    pub fn execute(
        &self,
        conn: &rusqlite::Connection,
        table: &'static str,
        id: i64,
    ) -> Result<usize, DatabaseError> {
        self.execute_where(conn, table, "id = ?", &[&id])
    }

    /// Executes the update against every row of `table` matching `condition`.
    ///
    /// `condition` is static SQL with `?` placeholders bound, in order, to
    /// `condition_params`. Returns the number of rows affected.
    pub fn execute_where(
        &self,
        conn: &rusqlite::Connection,
        table: &'static str,
        condition: &'static str,
        condition_params: &[&dyn ToSql],
    ) -> Result<usize, DatabaseError> {
        if self.items.is_empty() {
            return Ok(0);
        }

        let clauses: Vec<String> = self
            .items
            .iter()
            .map(|a| {
                if a.only_if_null {
                    format!("{col} = COALESCE({col}, ?)", col = a.column)
                } else {
                    format!("{} = ?", a.column)
                }
            })
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            clauses.join(", "),
            condition
        );

        let mut params: Vec<&dyn ToSql> = self.items.iter().map(|a| &a.value as &dyn ToSql).collect();
        params.extend_from_slice(condition_params);

        Ok(conn.execute(&sql, params.as_slice())?)
    }
}

pub(crate) fn validate_percent(field: &str, percent: u8) -> Result<(), DatabaseError> {
    if percent > 100 {
        return Err(DatabaseError::invalid_value(
            field,
            format!("{} is outside 0..=100", percent),
        ));
    }
    Ok(())
}

pub(crate) fn opt_text(s: Option<String>) -> SqlValue {
    s.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

fn required_string(field: &str, value: &Value) -> Result<String, DatabaseError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DatabaseError::invalid_value(field, format!("expected string, got {}", value)))
}

fn optional_string(field: &str, value: &Value) -> Result<Option<String>, DatabaseError> {
    match value {
        Value::Null => Ok(None),
        other => required_string(field, other).map(Some),
    }
}

fn optional_integer(field: &str, value: &Value) -> Result<Option<i64>, DatabaseError> {
    match value {
        Value::Null => Ok(None),
        other => other
            .as_i64()
            .map(Some)
            .ok_or_else(|| DatabaseError::invalid_value(field, format!("expected integer, got {}", other))),
    }
}

fn percent_value(field: &str, value: &Value) -> Result<u8, DatabaseError> {
    let raw = value
        .as_i64()
        .ok_or_else(|| DatabaseError::invalid_value(field, format!("expected integer, got {}", value)))?;
    u8::try_from(raw)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| DatabaseError::invalid_value(field, format!("{} is outside 0..=100", raw)))
}

fn parse_enum<T>(field: &str, s: &str) -> Result<T, DatabaseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    s.parse()
        .map_err(|e: T::Err| DatabaseError::invalid_value(field, e.to_string()))
}

fn parse_datetime(field: &str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::invalid_value(field, format!("'{}': {}", s, e)))
}

fn optional_datetime(field: &str, value: &Value) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    optional_string(field, value)?
        .map(|s| parse_datetime(field, &s))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_column_names_round_trip() {
        for column in JobColumn::ALL {
            assert_eq!(column.name().parse::<JobColumn>().unwrap(), column);
        }
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = "bogus_field".parse::<JobColumn>().unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidField { ref field } if field == "bogus_field"));

        // Near-misses and injection attempts are just unknown names.
        assert!("Status".parse::<JobColumn>().is_err());
        assert!("status = 'x'; --".parse::<JobColumn>().is_err());
        assert!("id".parse::<JobColumn>().is_err());
    }

    #[test]
    fn test_parse_map_typed_values() {
        let fields = JobField::parse_map(&map(json!({
            "progress_percent": 42,
            "stage": "download",
            "pid": null,
            "error_message": "boom",
        })))
        .unwrap();

        assert_eq!(fields.len(), 4);
        assert!(fields.contains(&JobField::ProgressPercent(42)));
        assert!(fields.contains(&JobField::Stage(Some(JobStage::Download))));
        assert!(fields.contains(&JobField::Pid(None)));
        assert!(fields.contains(&JobField::ErrorMessage(Some("boom".to_string()))));
    }

    #[test]
    fn test_parse_map_reports_unknown_name_before_bad_value() {
        let err = JobField::parse_map(&map(json!({
            "progress_percent": "lots",
            "bogus_field": 1,
        })))
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidField { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        assert!(matches!(
            JobField::parse("progress_percent", &json!(101)),
            Err(DatabaseError::InvalidValue { .. })
        ));
        assert!(matches!(
            JobField::parse("progress_percent", &json!(-1)),
            Err(DatabaseError::InvalidValue { .. })
        ));
        assert!(matches!(
            JobField::parse("stage", &json!("warp")),
            Err(DatabaseError::InvalidValue { .. })
        ));
        assert!(matches!(
            JobField::parse("url", &json!(null)),
            Err(DatabaseError::InvalidValue { .. })
        ));
        assert!(matches!(
            JobField::parse("started_at", &json!("not a date")),
            Err(DatabaseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_status_cannot_return_to_queued() {
        let err = JobField::parse("status", &json!("queued")).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { ref field, .. } if field == "status"));
        assert!(JobField::parse("status", &json!("failed")).is_ok());
    }

    #[test]
    fn test_status_cannot_be_set_to_running() {
        let err = JobField::parse("status", &json!("running")).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidValue { ref field, .. } if field == "status"));
        assert!(JobField::Status(JobStatus::Running).validate().is_err());
        assert!(JobField::Status(JobStatus::Canceled).validate().is_ok());
    }

    #[test]
    fn test_assignment_set_last_write_wins() {
        let mut set = AssignmentSet::default();
        set.push(Assignment::set("progress_percent", SqlValue::Integer(10)));
        set.push(Assignment::set("progress_percent", SqlValue::Integer(100)));
        assert_eq!(
            set.get("progress_percent").map(|a| a.value.clone()),
            Some(SqlValue::Integer(100))
        );
    }
}
