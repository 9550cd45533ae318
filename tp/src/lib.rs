//! Tempo - durable task scheduling and event-dispatch engine
//!
//! Tempo registers time-based tasks (cron expressions, named presets,
//! absolute timestamps, relative delays) and event-triggered tasks,
//! executes their handlers with a per-task concurrency guard, retries
//! failures with configurable backoff inside a retry window, applies
//! per-task rate limiting, and persists task and execution state so
//! pending work survives process restarts.
//!
//! # Core Concepts
//!
//! - **Single owner**: one [`TaskRunner`] instance owns all in-memory
//!   indices; multiple independent runners can coexist in one process
//! - **Handlers are capabilities**: supplied as plain async functions,
//!   held in memory, re-registered by the application after a restart
//! - **At-least-once**: handlers are assumed idempotent; a crash between
//!   fire and finalize re-runs the work, never loses the record of it
//!
//! # Modules
//!
//! - [`runner`] - the orchestrator and sole caller-facing surface
//! - [`bus`] - topic pub/sub with `*` wildcard matching
//! - [`scheduler`] - presets, cron-engine capability, one-shot timers
//! - [`retry`] - backoff and rate-limit policy
//! - [`time`] - duration parsing and absolute-time resolution
//! - [`handler`] - the task handler capability
//! - [`config`] - runner and task configuration

pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod time;

// Re-export commonly used types
pub use bus::{EventBus, EventData, Subscription, SubscriberCallback, callback};
pub use config::{RunnerConfig, TaskConfig};
pub use error::{Result, RunnerError};
pub use handler::{TaskContext, TaskHandler, Trigger, handler_fn};
pub use retry::{BackoffStrategy, RateLimit, RateLimitStrategy, RetryPolicy};
pub use runner::{RunnerStats, TaskRunner};
pub use scheduler::{CronClock, CronEngine, Scheduler};
pub use time::{
    ResolvedTime, add_duration, convert_after_to_at, parse_duration, resolve_absolute_time,
    validate_timezone,
};

// Re-export store types callers see in the operation surface
pub use tempostore::{Execution, ExecutionStatus, Task, TaskKind, TaskStatus};
