//! Task and Execution domain types
//!
//! Tasks describe one schedulable unit of work (cron, one-shot, or
//! event-triggered). Executions record individual run attempts.

use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

/// Current Unix timestamp in milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a stored millisecond timestamp back to a UTC datetime
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// How a task is triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fired by a cron expression or a one-shot timer
    Schedule,
    /// Fired by an event published on the bus
    Event,
}

impl TaskKind {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "event" => Ok(Self::Event),
            other => Err(StoreError::InvalidValue(format!("unknown task kind: {other}"))),
        }
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Idle, eligible to run
    #[default]
    Pending,
    /// An execution is currently in flight
    Running,
    /// Not eligible to run; triggers detached
    Paused,
}

impl TaskStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            other => Err(StoreError::InvalidValue(format!("unknown task status: {other}"))),
        }
    }
}

/// Outcome state of a single execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Handler is currently running
    Running,
    /// Handler returned without error
    Success,
    /// Handler returned an error
    Failed,
}

impl ExecutionStatus {
    /// Stable string form used in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidValue(format!(
                "unknown execution status: {other}"
            ))),
        }
    }
}

macro_rules! sql_enum {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: StoreError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_enum!(TaskKind);
sql_enum!(TaskStatus);
sql_enum!(ExecutionStatus);

/// Durable description of one schedulable unit
///
/// The scheduling descriptor is resolved at creation time: presets become
/// cron expressions, relative delays become an absolute `run_at`. Handlers
/// are held in memory by the runner and are never part of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Caller-supplied unique identifier (immutable)
    pub id: String,

    /// Optional display label
    pub name: Option<String>,

    /// Trigger kind (immutable after creation)
    pub kind: TaskKind,

    /// Resolved cron expression (preset/cron schedule tasks)
    pub cron: Option<String>,

    /// Resolved absolute fire time (one-shot `at`/`after` tasks)
    pub run_at: Option<DateTime<Utc>>,

    /// IANA timezone name used for cron evaluation
    pub timezone: String,

    /// Next computed fire time, if known
    pub next_run_at: Option<DateTime<Utc>>,

    /// Start time of the most recent successful run
    pub last_run_at: Option<DateTime<Utc>>,

    /// Topic that triggers this task (event tasks only)
    pub on_event: Option<String>,

    /// Consecutive failures since the last success
    pub attempts: u32,

    /// Retry ceiling (1 = no retry)
    pub max_attempts: u32,

    /// Runs counted in the current fixed rate window
    pub rate_count: u32,

    /// Start of the current fixed rate window
    pub rate_window: Option<DateTime<Utc>>,

    /// Lifecycle state
    pub status: TaskStatus,

    /// Mirror of `status == Paused`
    pub is_paused: bool,

    /// Opaque caller payload, never interpreted
    pub metadata: Option<Value>,

    /// Creation time; anchors the retry window
    pub created_at: DateTime<Utc>,
}

/// Partial update of a task record
///
/// Only fields that are `Some` are written. Double-`Option` fields can be
/// set to NULL by passing `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub is_paused: Option<bool>,
    pub attempts: Option<u32>,
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    pub rate_count: Option<u32>,
    pub rate_window: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lifecycle state and its paused mirror in one step
    pub fn status(mut self, status: TaskStatus) -> Self {
        self.is_paused = Some(status == TaskStatus::Paused);
        self.status = Some(status);
        self
    }

    /// Set the failure streak counter
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Set or clear the next fire time
    pub fn next_run_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    /// Set or clear the last run time
    pub fn last_run_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_run_at = Some(at);
        self
    }

    /// Set the fixed-window rate counter
    pub fn rate_count(mut self, count: u32) -> Self {
        self.rate_count = Some(count);
        self
    }

    /// Set or clear the fixed-window start
    pub fn rate_window(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.rate_window = Some(at);
        self
    }

    /// True if no field would be written
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.is_paused.is_none()
            && self.attempts.is_none()
            && self.next_run_at.is_none()
            && self.last_run_at.is_none()
            && self.rate_count.is_none()
            && self.rate_window.is_none()
    }
}

/// One record per run attempt of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique execution identifier
    pub id: String,

    /// Owning task
    pub task_id: String,

    /// Outcome state
    pub status: ExecutionStatus,

    /// When the handler was invoked
    pub started_at: DateTime<Utc>,

    /// When the handler settled (None while running)
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message (failed executions only)
    pub error: Option<String>,

    /// 1-based ordinal within the task's current failure streak
    pub attempt: u32,
}

impl Execution {
    /// Allocate a new running execution for a task
    pub fn begin(task_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_id: task_id.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [TaskKind::Schedule, TaskKind::Event] {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert!("cron".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Paused] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("stopped".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_update_status_sets_paused_mirror() {
        let update = TaskUpdate::new().status(TaskStatus::Paused);
        assert_eq!(update.is_paused, Some(true));

        let update = TaskUpdate::new().status(TaskStatus::Pending);
        assert_eq!(update.is_paused, Some(false));
    }

    #[test]
    fn test_empty_update() {
        assert!(TaskUpdate::new().is_empty());
        assert!(!TaskUpdate::new().attempts(1).is_empty());
    }

    #[test]
    fn test_execution_begin() {
        let exec = Execution::begin("task-1", 1);
        assert_eq!(exec.task_id, "task-1");
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.attempt, 1);
        assert!(exec.completed_at.is_none());
        assert!(exec.error.is_none());
    }
}
