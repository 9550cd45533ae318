//! SQLite-backed persistence for tasks and executions
//!
//! The store is deliberately dumb: it guarantees atomicity of single
//! record writes and decodes rows back into domain types, but invariant
//! enforcement (descriptor exclusivity, status transitions) belongs to
//! the runner that owns it.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::task::{Execution, ExecutionStatus, Task, TaskKind, TaskStatus, TaskUpdate, from_ms};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    name TEXT,
    kind TEXT NOT NULL CHECK (kind IN ('schedule', 'event')),
    cron TEXT,
    run_at INTEGER,
    timezone TEXT NOT NULL,
    next_run_at INTEGER,
    last_run_at INTEGER,
    on_event TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 1,
    rate_count INTEGER NOT NULL DEFAULT 0,
    rate_window INTEGER,
    status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'paused')),
    is_paused INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, is_paused);
CREATE INDEX IF NOT EXISTS idx_tasks_kind ON tasks(kind);

CREATE TABLE IF NOT EXISTS task_executions (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    status TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    error TEXT,
    attempt INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_executions_task ON task_executions(task_id, started_at DESC);
"#;

const TASK_COLUMNS: &str = "id, name, kind, cron, run_at, timezone, next_run_at, last_run_at, \
     on_event, attempts, max_attempts, rate_count, rate_window, status, is_paused, metadata, \
     created_at";

const EXECUTION_COLUMNS: &str = "id, task_id, status, started_at, completed_at, error, attempt";

/// Aggregate record counts for introspection
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub paused: u64,
    pub executions: u64,
}

/// Durable store for task and execution records
pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "TaskStore::open");
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an ephemeral in-memory store
    pub fn open_in_memory() -> Result<Self> {
        debug!("TaskStore::open_in_memory");
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // === Task operations ===

    /// Insert a new task record
    pub fn insert_task(&self, task: &Task) -> Result<()> {
        debug!(id = %task.id, kind = %task.kind, "TaskStore::insert_task");
        let metadata = task.metadata.as_ref().map(serde_json::to_string).transpose()?;
        self.conn.execute(
            &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                task.id,
                task.name,
                task.kind,
                task.cron,
                task.run_at.map(|t| t.timestamp_millis()),
                task.timezone,
                task.next_run_at.map(|t| t.timestamp_millis()),
                task.last_run_at.map(|t| t.timestamp_millis()),
                task.on_event,
                task.attempts,
                task.max_attempts,
                task.rate_count,
                task.rate_window.map(|t| t.timestamp_millis()),
                task.status,
                task.is_paused,
                metadata,
                task.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Look up a task by id
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"),
                params![id],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    /// Apply a partial update to a task, touching only named fields
    pub fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<()> {
        debug!(%id, ?update, "TaskStore::update_task");
        if update.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<&str> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = update.status {
            sets.push("status = ?");
            bound.push(Box::new(status));
        }
        if let Some(is_paused) = update.is_paused {
            sets.push("is_paused = ?");
            bound.push(Box::new(is_paused));
        }
        if let Some(attempts) = update.attempts {
            sets.push("attempts = ?");
            bound.push(Box::new(attempts));
        }
        if let Some(next_run_at) = update.next_run_at {
            sets.push("next_run_at = ?");
            bound.push(Box::new(next_run_at.map(|t| t.timestamp_millis())));
        }
        if let Some(last_run_at) = update.last_run_at {
            sets.push("last_run_at = ?");
            bound.push(Box::new(last_run_at.map(|t| t.timestamp_millis())));
        }
        if let Some(rate_count) = update.rate_count {
            sets.push("rate_count = ?");
            bound.push(Box::new(rate_count));
        }
        if let Some(rate_window) = update.rate_window {
            sets.push("rate_window = ?");
            bound.push(Box::new(rate_window.map(|t| t.timestamp_millis())));
        }

        let sql = format!("UPDATE tasks SET {} WHERE id = ?", sets.join(", "));
        bound.push(Box::new(id.to_string()));

        let changed = self.conn.execute(&sql, params_from_iter(bound.iter()))?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete a task, cascading to its executions
    ///
    /// Returns false if no task with the id existed.
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        debug!(%id, "TaskStore::delete_task");
        // Explicit cascade so deletion does not depend on the pragma
        self.conn
            .execute("DELETE FROM task_executions WHERE task_id = ?", params![id])?;
        let changed = self.conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        Ok(changed > 0)
    }

    /// All task records
    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        self.query_tasks("", &[])
    }

    /// Tasks in a given lifecycle state
    pub fn tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.query_tasks("WHERE status = ?", &[Box::new(status)])
    }

    /// Tasks of a given trigger kind
    pub fn tasks_by_kind(&self, kind: TaskKind) -> Result<Vec<Task>> {
        self.query_tasks("WHERE kind = ?", &[Box::new(kind)])
    }

    /// Pending, unpaused tasks — the set to re-arm after a restart
    pub fn pending_unpaused(&self) -> Result<Vec<Task>> {
        self.query_tasks("WHERE status = 'pending' AND is_paused = 0", &[])
    }

    fn query_tasks(&self, clause: &str, bound: &[Box<dyn rusqlite::ToSql>]) -> Result<Vec<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks {clause} ORDER BY created_at");
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt
            .query_map(params_from_iter(bound.iter()), task_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tasks)
    }

    // === Execution operations ===

    /// Insert a new execution record
    pub fn insert_execution(&self, exec: &Execution) -> Result<()> {
        debug!(id = %exec.id, task_id = %exec.task_id, attempt = exec.attempt, "TaskStore::insert_execution");
        self.conn.execute(
            &format!("INSERT INTO task_executions ({EXECUTION_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
            params![
                exec.id,
                exec.task_id,
                exec.status,
                exec.started_at.timestamp_millis(),
                exec.completed_at.map(|t| t.timestamp_millis()),
                exec.error,
                exec.attempt,
            ],
        )?;
        Ok(())
    }

    /// Finalize a running execution as success or failure
    pub fn finalize_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        debug!(%id, %status, "TaskStore::finalize_execution");
        self.conn.execute(
            "UPDATE task_executions SET status = ?, error = ?, completed_at = ? WHERE id = ?",
            params![status, error, completed_at.timestamp_millis(), id],
        )?;
        Ok(())
    }

    /// Execution history for a task, newest first
    pub fn executions_for_task(&self, task_id: &str) -> Result<Vec<Execution>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM task_executions WHERE task_id = ? ORDER BY started_at DESC"
        ))?;
        let execs = stmt
            .query_map(params![task_id], execution_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(execs)
    }

    /// Count executions of a task started at or after the given instant
    ///
    /// Used by the sliding-window rate limiter.
    pub fn count_executions_since(&self, task_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM task_executions WHERE task_id = ? AND started_at >= ?",
            params![task_id, since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Aggregate record counts
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        let mut stmt = self.conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, TaskStatus>(0)?, row.get::<_, i64>(1)? as u64)))?;
        for row in rows {
            let (status, count) = row?;
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Running => stats.running = count,
                TaskStatus::Paused => stats.paused = count,
            }
            stats.total += count;
        }
        stats.executions = self
            .conn
            .query_row("SELECT COUNT(*) FROM task_executions", [], |row| {
                row.get::<_, i64>(0)
            })? as u64;
        Ok(stats)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let metadata = row
        .get::<_, Option<String>>(15)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(15, Type::Text, Box::new(e)))?;

    Ok(Task {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: row.get(2)?,
        cron: row.get(3)?,
        run_at: row.get::<_, Option<i64>>(4)?.map(from_ms),
        timezone: row.get(5)?,
        next_run_at: row.get::<_, Option<i64>>(6)?.map(from_ms),
        last_run_at: row.get::<_, Option<i64>>(7)?.map(from_ms),
        on_event: row.get(8)?,
        attempts: row.get(9)?,
        max_attempts: row.get(10)?,
        rate_count: row.get(11)?,
        rate_window: row.get::<_, Option<i64>>(12)?.map(from_ms),
        status: row.get(13)?,
        is_paused: row.get(14)?,
        metadata,
        created_at: from_ms(row.get(16)?),
    })
}

fn execution_from_row(row: &Row<'_>) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get(0)?,
        task_id: row.get(1)?,
        status: row.get(2)?,
        started_at: from_ms(row.get(3)?),
        completed_at: row.get::<_, Option<i64>>(4)?.map(from_ms),
        error: row.get(5)?,
        attempt: row.get(6)?,
    })
}
