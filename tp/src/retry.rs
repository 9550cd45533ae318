//! Retry backoff and rate-limit accounting
//!
//! Retries are bounded twice: by the per-task attempt ceiling and by an
//! optional wall-clock window anchored at the task's creation time. Rate
//! limits run before every execution attempt, including retries and
//! event-triggered runs; a skipped run is reported, never failed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use tempostore::{Task, TaskStore, TaskUpdate};

/// How the delay between retries grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant `base_delay` between retries
    #[default]
    Fixed,
    /// `base_delay * 2^(n-1)` before the n-th retry
    Exponential,
}

/// Retry behavior for failed executions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay growth strategy
    pub strategy: BackoffStrategy,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,

    /// Wall-clock bound on retrying, measured from task creation
    pub max_retry_duration_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_ms: 1_000,
            max_retry_duration_ms: None,
        }
    }
}

/// What to do after a failed execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the delay
    Retry { delay_ms: u64 },
    /// Attempt ceiling reached; stop retrying
    Exhausted,
    /// The next retry would overrun the retry window; abandon it
    WindowExceeded,
}

impl RetryPolicy {
    /// Fixed backoff with the given base delay
    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay_ms,
            max_retry_duration_ms: None,
        }
    }

    /// Exponential backoff with the given base delay
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay_ms,
            max_retry_duration_ms: None,
        }
    }

    /// Bound cumulative retrying to a window after task creation
    pub fn max_retry_duration_ms(mut self, ms: u64) -> Self {
        self.max_retry_duration_ms = Some(ms);
        self
    }

    /// Delay before the n-th retry (1-based)
    pub fn backoff_delay_ms(&self, retry: u32) -> u64 {
        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms,
            BackoffStrategy::Exponential => {
                self.base_delay_ms.saturating_mul(1_u64 << retry.saturating_sub(1).min(63))
            }
        }
    }

    /// Decide the follow-up to a failure
    ///
    /// `failures` is the task's consecutive-failure count including the
    /// one that just happened; the retry about to run is ordinal
    /// `failures` in the streak.
    pub fn evaluate(
        &self,
        failures: u32,
        max_attempts: u32,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if failures >= max_attempts {
            return RetryDecision::Exhausted;
        }

        let delay_ms = self.backoff_delay_ms(failures);
        if let Some(window_ms) = self.max_retry_duration_ms {
            let elapsed_ms = (now - created_at).num_milliseconds().max(0) as u64;
            if elapsed_ms.saturating_add(delay_ms) > window_ms {
                return RetryDecision::WindowExceeded;
            }
        }

        RetryDecision::Retry { delay_ms }
    }
}

/// Rate-limit accounting strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    /// Counter on the task record, reset at fixed intervals
    #[default]
    Fixed,
    /// Count execution records within a trailing interval
    Sliding,
}

/// Per-task execution rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    /// Accounting strategy
    pub strategy: RateLimitStrategy,

    /// Maximum runs per interval
    pub limit: u32,

    /// Window length in milliseconds
    pub interval_ms: u64,
}

/// Whether a run may proceed under the rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under the limit; bookkeeping updated where applicable
    Proceed,
    /// Over the limit; the run is skipped, not queued
    Skip,
}

impl RateLimit {
    /// Fixed-window limit: at most `limit` runs per interval
    pub fn fixed(limit: u32, interval_ms: u64) -> Self {
        Self {
            strategy: RateLimitStrategy::Fixed,
            limit,
            interval_ms,
        }
    }

    /// Sliding-window limit counted from the execution log
    pub fn sliding(limit: u32, interval_ms: u64) -> Self {
        Self {
            strategy: RateLimitStrategy::Sliding,
            limit,
            interval_ms,
        }
    }

    /// Check (and for the fixed strategy, update) the limit for one run
    ///
    /// Skips never consume a retry attempt and never mark the task
    /// failed; the caller just drops the run.
    pub fn check(&self, store: &TaskStore, task: &Task, now: DateTime<Utc>) -> tempostore::Result<RateDecision> {
        let interval = Duration::milliseconds(self.interval_ms as i64);
        match self.strategy {
            RateLimitStrategy::Sliding => {
                let count = store.count_executions_since(&task.id, now - interval)?;
                if count >= self.limit {
                    debug!(id = %task.id, count, limit = self.limit, "sliding rate limit hit");
                    Ok(RateDecision::Skip)
                } else {
                    Ok(RateDecision::Proceed)
                }
            }
            RateLimitStrategy::Fixed => {
                let window_open = task.rate_window.is_some_and(|start| now - start < interval);
                if !window_open {
                    store.update_task(&task.id, &TaskUpdate::new().rate_count(1).rate_window(Some(now)))?;
                    return Ok(RateDecision::Proceed);
                }
                if task.rate_count >= self.limit {
                    debug!(id = %task.id, count = task.rate_count, limit = self.limit, "fixed rate limit hit");
                    return Ok(RateDecision::Skip);
                }
                store.update_task(&task.id, &TaskUpdate::new().rate_count(task.rate_count + 1))?;
                Ok(RateDecision::Proceed)
            }
        }
    }
}
