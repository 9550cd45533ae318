//! TempoStore - persistent task and execution state on SQLite
//!
//! Stores the durable half of the tempo runner: task records and their
//! execution history. The store survives process restarts so pending work
//! can be re-armed on the next start.
//!
//! # Layout
//!
//! ```text
//! tasks            one row per registered task (schedule or event)
//! task_executions  one row per run attempt, cascade-deleted with the task
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tempostore::{TaskStore, TaskStatus};
//!
//! let store = TaskStore::open("tempo.db")?;
//! let pending = store.pending_unpaused()?;
//! let history = store.executions_for_task("nightly-report")?;
//! ```

mod error;
mod store;
mod task;

pub use error::{Result, StoreError};
pub use store::{StoreStats, TaskStore};
pub use task::{
    Execution, ExecutionStatus, Task, TaskKind, TaskStatus, TaskUpdate, from_ms, now_ms,
};
