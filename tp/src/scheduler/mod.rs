//! Trigger arming: presets, cron jobs, and one-shot timers
//!
//! Translates a resolved task descriptor into an armed cron job or
//! single-shot timer and tears it down on pause/delete. Cron evaluation
//! itself is delegated to a [`CronEngine`].

mod engine;

pub use engine::{CronClock, CronEngine, FireCallback};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, RunnerError};

/// Named cron aliases, 6-field form (seconds first)
const PRESETS: &[(&str, &str)] = &[
    ("yearly", "0 0 0 1 1 *"),
    ("annually", "0 0 0 1 1 *"),
    ("monthly", "0 0 0 1 * *"),
    ("weekly", "0 0 0 * * Sun"),
    ("daily", "0 0 0 * * *"),
    ("midnight", "0 0 0 * * *"),
    ("hourly", "0 0 * * * *"),
];

/// Resolve a preset name ("@daily", "midnight", ...) to its cron form
pub fn preset_expression(name: &str) -> Result<&'static str> {
    let key = name.trim().trim_start_matches('@').to_ascii_lowercase();
    PRESETS
        .iter()
        .find(|(preset, _)| *preset == key)
        .map(|(_, expression)| *expression)
        .ok_or_else(|| RunnerError::UnknownPreset(name.to_string()))
}

/// Validate a cron expression, widening 5-field forms to 6 fields
///
/// Callers may supply classic 5-field expressions; the evaluation engine
/// works in 6-field (seconds-first) form.
pub fn normalize_expression(expression: &str) -> Result<String> {
    let trimmed = expression.trim();
    let widened = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&widened).map_err(RunnerError::Cron)?;
    Ok(widened)
}

/// Next occurrence of an expression in a timezone, from now
pub fn next_occurrence(expression: &str, timezone: &str) -> Result<Option<DateTime<Utc>>> {
    let schedule = cron::Schedule::from_str(expression).map_err(RunnerError::Cron)?;
    let tz: chrono_tz::Tz = timezone
        .parse()
        .map_err(|_| RunnerError::InvalidTimezone(timezone.to_string()))?;
    let next = schedule.after(&Utc::now().with_timezone(&tz)).next();
    Ok(next.map(|t| t.with_timezone(&Utc)))
}

struct OneShot {
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Armed-trigger bookkeeping for one runner instance
pub struct Scheduler {
    engine: Arc<dyn CronEngine>,
    timers: Arc<Mutex<HashMap<String, OneShot>>>,
}

impl Scheduler {
    /// Create a scheduler over a cron engine
    pub fn new(engine: Arc<dyn CronEngine>) -> Self {
        Self {
            engine,
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm a cron job for a task
    pub async fn arm_cron(&self, task_id: &str, expression: &str, timezone: &str, fire: FireCallback) -> Result<()> {
        self.engine.arm(task_id, expression, timezone, fire).await
    }

    /// Arm a single-shot timer for a task
    ///
    /// A target already in the past fires immediately rather than
    /// leaving the task unarmed.
    pub async fn arm_one_shot(&self, task_id: &str, fire_at: DateTime<Utc>, fire: FireCallback) {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or_default();
        if delay.is_zero() {
            info!(%task_id, %fire_at, "one-shot target already past, firing now");
        } else {
            debug!(%task_id, %fire_at, ?delay, "Scheduler::arm_one_shot");
        }

        let timers = Arc::downgrade(&self.timers);
        let id = task_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            (fire.as_ref())(id.clone()).await;
            if let Some(timers) = timers.upgrade() {
                timers.lock().await.remove(&id);
            }
        });

        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.insert(task_id.to_string(), OneShot { fire_at, handle }) {
            old.handle.abort();
        }
    }

    /// Detach a task's trigger on pause
    ///
    /// Cron jobs stay armed but suppressed; one-shot timers are released
    /// and must be re-armed from stored fields on resume.
    pub async fn pause(&self, task_id: &str) -> bool {
        if self.engine.pause(task_id).await {
            return true;
        }
        let mut timers = self.timers.lock().await;
        match timers.remove(task_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Un-pause an existing cron job; false if none is armed
    pub async fn resume_cron(&self, task_id: &str) -> bool {
        self.engine.resume(task_id).await
    }

    /// Tear down whatever trigger is armed for a task
    pub async fn disarm(&self, task_id: &str) -> bool {
        let stopped = self.engine.stop(task_id).await;
        let mut timers = self.timers.lock().await;
        match timers.remove(task_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => stopped,
        }
    }

    /// Live next fire time from the armed trigger, if any
    pub async fn next_run(&self, task_id: &str) -> Option<DateTime<Utc>> {
        if let Some(next) = self.engine.next_run(task_id).await {
            return Some(next);
        }
        self.timers.lock().await.get(task_id).map(|timer| timer.fire_at)
    }

    /// Live previous fire time from the armed cron job, if any
    pub async fn previous_run(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.engine.previous_run(task_id).await
    }

    /// Number of armed triggers (cron jobs + timers)
    pub async fn armed_count(&self) -> usize {
        self.engine.armed_count().await + self.timers.lock().await.len()
    }

    /// Detach everything
    pub async fn shutdown(&self) {
        debug!("Scheduler::shutdown");
        self.engine.stop_all().await;
        let mut timers = self.timers.lock().await;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_fire(counter: Arc<AtomicUsize>) -> FireCallback {
        Arc::new(move |_id| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[test]
    fn test_preset_expressions() {
        assert_eq!(preset_expression("@daily").unwrap(), "0 0 0 * * *");
        assert_eq!(preset_expression("midnight").unwrap(), "0 0 0 * * *");
        assert_eq!(preset_expression("@HOURLY").unwrap(), "0 0 * * * *");
        assert_eq!(preset_expression("@weekly").unwrap(), "0 0 0 * * Sun");
        assert!(matches!(preset_expression("@fortnightly"), Err(RunnerError::UnknownPreset(_))));
    }

    #[test]
    fn test_normalize_widens_five_field_expressions() {
        assert_eq!(normalize_expression("0 0 * * *").unwrap(), "0 0 0 * * *");
        assert_eq!(normalize_expression("0 0 0 * * *").unwrap(), "0 0 0 * * *");
        assert!(normalize_expression("not cron").is_err());
    }

    #[tokio::test]
    async fn test_one_shot_fires_once() {
        let scheduler = Scheduler::new(Arc::new(CronClock::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let fire_at = Utc::now() + chrono::Duration::milliseconds(50);
        scheduler.arm_one_shot("t", fire_at, counting_fire(counter.clone())).await;
        assert_eq!(scheduler.armed_count().await, 1);
        assert_eq!(scheduler.next_run("t").await, Some(fire_at));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // The timer removed itself after firing
        assert_eq!(scheduler.armed_count().await, 0);
    }

    #[tokio::test]
    async fn test_one_shot_past_target_fires_immediately() {
        let scheduler = Scheduler::new(Arc::new(CronClock::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let fire_at = Utc::now() - chrono::Duration::seconds(10);
        scheduler.arm_one_shot("t", fire_at, counting_fire(counter.clone())).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pause_releases_one_shot() {
        let scheduler = Scheduler::new(Arc::new(CronClock::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let fire_at = Utc::now() + chrono::Duration::milliseconds(100);
        scheduler.arm_one_shot("t", fire_at, counting_fire(counter.clone())).await;

        assert!(scheduler.pause("t").await);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.armed_count().await, 0);
    }

    #[tokio::test]
    async fn test_disarm_unknown_task() {
        let scheduler = Scheduler::new(Arc::new(CronClock::new()));
        assert!(!scheduler.disarm("nope").await);
        assert!(!scheduler.pause("nope").await);
    }
}
