//! Cron evaluation capability
//!
//! The runner treats cron evaluation as an opaque collaborator behind
//! [`CronEngine`]: arm a (expression, timezone) pair, get fire callbacks,
//! pause/resume/stop, query next and previous fire times. [`CronClock`]
//! is the built-in implementation on tokio timers and the `cron` crate;
//! any other engine can be substituted without touching scheduling logic.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Result, RunnerError};
use tempostore::from_ms;

/// Callback invoked with the task id on every cron fire
pub type FireCallback = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// External cron-evaluation capability
#[async_trait]
pub trait CronEngine: Send + Sync {
    /// Arm an expression in a timezone; re-arming a task id replaces its job
    async fn arm(&self, task_id: &str, expression: &str, timezone: &str, fire: FireCallback) -> Result<()>;

    /// Suppress fires without tearing the job down
    async fn pause(&self, task_id: &str) -> bool;

    /// Undo a pause; false if no job is armed for the id
    async fn resume(&self, task_id: &str) -> bool;

    /// Tear a job down
    async fn stop(&self, task_id: &str) -> bool;

    /// Next computed fire time of an armed job
    async fn next_run(&self, task_id: &str) -> Option<DateTime<Utc>>;

    /// Most recent fire time of an armed job
    async fn previous_run(&self, task_id: &str) -> Option<DateTime<Utc>>;

    /// Tear all jobs down
    async fn stop_all(&self);

    /// Number of armed jobs
    async fn armed_count(&self) -> usize;
}

struct CronJob {
    paused: Arc<AtomicBool>,
    // Fire times as millis; 0 = not yet known
    next_ms: Arc<AtomicI64>,
    prev_ms: Arc<AtomicI64>,
    handle: JoinHandle<()>,
}

/// Built-in cron engine on tokio timers
///
/// Each armed job runs a loop that computes the next occurrence in the
/// job's timezone, sleeps until it, then fires. Paused jobs keep ticking
/// but skip the callback, so resume picks up at the next natural fire.
pub struct CronClock {
    jobs: Mutex<HashMap<String, CronJob>>,
}

impl CronClock {
    /// Create an engine with no armed jobs
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for CronClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CronEngine for CronClock {
    async fn arm(&self, task_id: &str, expression: &str, timezone: &str, fire: FireCallback) -> Result<()> {
        let schedule = Schedule::from_str(expression)?;
        let tz: Tz = timezone
            .parse()
            .map_err(|_| RunnerError::InvalidTimezone(timezone.to_string()))?;

        let paused = Arc::new(AtomicBool::new(false));
        let next_ms = Arc::new(AtomicI64::new(0));
        let prev_ms = Arc::new(AtomicI64::new(0));

        let loop_paused = paused.clone();
        let loop_next = next_ms.clone();
        let loop_prev = prev_ms.clone();
        let loop_id = task_id.to_string();

        debug!(%task_id, %expression, %timezone, "CronClock::arm");
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now().with_timezone(&tz);
                let Some(next) = schedule.after(&now).next() else {
                    warn!(task_id = %loop_id, "no future fire times, job stops");
                    break;
                };
                let next_utc = next.with_timezone(&Utc);
                loop_next.store(next_utc.timestamp_millis(), Ordering::SeqCst);

                let delay = (next_utc - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;

                loop_prev.store(next_utc.timestamp_millis(), Ordering::SeqCst);
                if loop_paused.load(Ordering::SeqCst) {
                    debug!(task_id = %loop_id, "paused, tick skipped");
                    continue;
                }
                (fire.as_ref())(loop_id.clone()).await;
            }
        });

        let mut jobs = self.jobs.lock().await;
        if let Some(old) = jobs.insert(
            task_id.to_string(),
            CronJob {
                paused,
                next_ms,
                prev_ms,
                handle,
            },
        ) {
            old.handle.abort();
        }
        Ok(())
    }

    async fn pause(&self, task_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(task_id) {
            Some(job) => {
                job.paused.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn resume(&self, task_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        match jobs.get(task_id) {
            Some(job) => {
                job.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    async fn stop(&self, task_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.remove(task_id) {
            Some(job) => {
                job.handle.abort();
                true
            }
            None => false,
        }
    }

    async fn next_run(&self, task_id: &str) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().await;
        jobs.get(task_id).and_then(|job| {
            let ms = job.next_ms.load(Ordering::SeqCst);
            (ms != 0).then(|| from_ms(ms))
        })
    }

    async fn previous_run(&self, task_id: &str) -> Option<DateTime<Utc>> {
        let jobs = self.jobs.lock().await;
        jobs.get(task_id).and_then(|job| {
            let ms = job.prev_ms.load(Ordering::SeqCst);
            (ms != 0).then(|| from_ms(ms))
        })
    }

    async fn stop_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for (_, job) in jobs.drain() {
            job.handle.abort();
        }
    }

    async fn armed_count(&self) -> usize {
        self.jobs.lock().await.len()
    }
}
