//! Runner and task configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::retry::{RateLimit, RetryPolicy};
use tempostore::TaskKind;

/// Construction-time configuration for a [`crate::TaskRunner`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Path to the store database; None = ephemeral in-memory store
    pub storage_location: Option<PathBuf>,

    /// Timezone applied to tasks that do not name one
    pub default_timezone: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            storage_location: None,
            default_timezone: "UTC".to_string(),
        }
    }
}

impl RunnerConfig {
    /// In-memory store, UTC default timezone
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// File-backed store at the given path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            storage_location: Some(path.into()),
            ..Self::default()
        }
    }

    /// Override the default timezone
    pub fn default_timezone(mut self, tz: impl Into<String>) -> Self {
        self.default_timezone = tz.into();
        self
    }
}

/// Creation-time configuration for one task
///
/// Schedule tasks carry exactly one of `preset`/`cron`/`at`/`after`;
/// event tasks carry `on_event`. The runner validates this at creation —
/// the config itself is a plain carrier.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Caller-supplied unique identifier
    pub id: String,

    /// Optional display label
    pub name: Option<String>,

    /// Trigger kind
    pub kind: TaskKind,

    /// Named cron alias, e.g. "@daily"
    pub preset: Option<String>,

    /// Raw cron expression
    pub cron: Option<String>,

    /// Absolute fire time (ISO-like, naive input reads as UTC)
    pub at: Option<String>,

    /// Relative delay, resolved once at creation
    pub after: Option<String>,

    /// Topic that triggers an event task
    pub on_event: Option<String>,

    /// IANA timezone; defaults to the runner-wide default
    pub timezone: Option<String>,

    /// Retry ceiling (1 = no retry)
    pub max_attempts: u32,

    /// Backoff behavior for failed executions
    pub retry: RetryPolicy,

    /// Optional per-task rate limiting
    pub rate_limit: Option<RateLimit>,

    /// Opaque caller payload stored with the record
    pub metadata: Option<Value>,

    /// Create in the paused state (no trigger armed)
    pub paused: bool,
}

impl TaskConfig {
    fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            preset: None,
            cron: None,
            at: None,
            after: None,
            on_event: None,
            timezone: None,
            max_attempts: 1,
            retry: RetryPolicy::default(),
            rate_limit: None,
            metadata: None,
            paused: false,
        }
    }

    /// Start a schedule task config (set exactly one descriptor)
    pub fn schedule(id: impl Into<String>) -> Self {
        Self::new(id, TaskKind::Schedule)
    }

    /// Start an event task config triggered by `topic`
    pub fn event(id: impl Into<String>, topic: impl Into<String>) -> Self {
        let mut config = Self::new(id, TaskKind::Event);
        config.on_event = Some(topic.into());
        config
    }

    /// Display label
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Named cron alias
    pub fn preset(mut self, preset: impl Into<String>) -> Self {
        self.preset = Some(preset.into());
        self
    }

    /// Raw cron expression
    pub fn cron(mut self, expression: impl Into<String>) -> Self {
        self.cron = Some(expression.into());
        self
    }

    /// Absolute fire time
    pub fn at(mut self, at: impl Into<String>) -> Self {
        self.at = Some(at.into());
        self
    }

    /// Relative delay from now
    pub fn after(mut self, after: impl Into<String>) -> Self {
        self.after = Some(after.into());
        self
    }

    /// IANA timezone name
    pub fn timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }

    /// Retry ceiling
    pub fn max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Backoff behavior
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Per-task rate limit
    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    /// Opaque metadata payload
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Create without arming the trigger
    pub fn paused(mut self) -> Self {
        self.paused = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_config_defaults() {
        let config = RunnerConfig::default();
        assert!(config.storage_location.is_none());
        assert_eq!(config.default_timezone, "UTC");
    }

    #[test]
    fn test_task_config_builders() {
        let config = TaskConfig::schedule("nightly").preset("@daily").timezone("Europe/London");
        assert_eq!(config.kind, TaskKind::Schedule);
        assert_eq!(config.preset.as_deref(), Some("@daily"));
        assert_eq!(config.timezone.as_deref(), Some("Europe/London"));
        assert_eq!(config.max_attempts, 1);
        assert!(!config.paused);

        let config = TaskConfig::event("on-login", "user:login");
        assert_eq!(config.kind, TaskKind::Event);
        assert_eq!(config.on_event.as_deref(), Some("user:login"));
    }
}
