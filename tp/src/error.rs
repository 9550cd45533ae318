//! Error types for the runner

use thiserror::Error;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors raised synchronously by the runner's public operations
///
/// Handler failures are never surfaced through this type: they are
/// captured into the execution record and handed to the retry
/// controller. Rate-limit skips and abandoned retries are reported via
/// logging only.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A task configuration violated a creation rule
    #[error("validation error: {0}")]
    Validation(String),

    /// Operation referenced an unknown task id
    #[error("task not found: {0}")]
    NotFound(String),

    /// A task with the same id already exists
    #[error("task already exists: {0}")]
    DuplicateTask(String),

    /// Preset name has no cron mapping
    #[error("unknown preset: {0}")]
    UnknownPreset(String),

    /// Timezone is not a resolvable IANA zone name
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Duration string did not match `<number><ms|s|m|h|d>`
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// Date-time string could not be parsed
    #[error("invalid date-time: {0}")]
    InvalidDateTime(String),

    /// Cron expression failed to parse
    #[error("invalid cron expression: {0}")]
    Cron(#[from] cron::error::Error),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] tempostore::StoreError),

    /// The runner has been shut down
    #[error("runner is shut down")]
    Shutdown,
}
