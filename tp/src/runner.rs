//! Task Runner Orchestrator
//!
//! The sole caller-facing surface: validates task configs, persists
//! records, arms triggers, guards executions, and applies retry and
//! rate-limit policy. One runner instance owns all in-memory indices
//! (armed triggers, in-flight set, handler registrations), so multiple
//! independent runners can coexist in one process.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, EventData, Subscription, SubscriberCallback, callback};
use crate::config::{RunnerConfig, TaskConfig};
use crate::error::{Result, RunnerError};
use crate::handler::{TaskContext, TaskHandler, Trigger};
use crate::retry::{RateDecision, RateLimit, RetryDecision, RetryPolicy};
use crate::scheduler::{CronClock, CronEngine, FireCallback, Scheduler};
use crate::{scheduler, time};
use tempostore::{
    Execution, ExecutionStatus, StoreError, Task, TaskKind, TaskStatus, TaskStore, TaskUpdate,
};

/// Aggregate runner state for introspection
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct RunnerStats {
    /// Registered tasks
    pub total: u64,
    /// Tasks eligible to run
    pub pending: u64,
    /// Tasks with an execution in flight
    pub running: u64,
    /// Paused tasks
    pub paused: u64,
    /// Armed cron jobs and one-shot timers
    pub armed_schedules: usize,
    /// Bus registrations (task subscriptions and direct subscribers)
    pub event_subscriptions: usize,
}

/// In-memory, per-task runtime state supplied at registration
///
/// Handlers and their policies are capabilities, not records: after a
/// restart the owning application re-registers them before resuming.
#[derive(Clone)]
struct Registration {
    handler: Arc<dyn TaskHandler>,
    retry: RetryPolicy,
    rate_limit: Option<RateLimit>,
    subscription: Option<Subscription>,
}

struct RunnerInner {
    store: Mutex<TaskStore>,
    bus: Arc<EventBus>,
    scheduler: Scheduler,
    registrations: RwLock<HashMap<String, Registration>>,
    in_flight: Mutex<HashSet<String>>,
    retry_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    default_timezone: String,
    shutdown: AtomicBool,
}

/// Durable task scheduling and event-dispatch engine
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl TaskRunner {
    /// Create a runner with the built-in cron engine
    pub fn new(config: RunnerConfig) -> Result<Self> {
        Self::with_engine(config, Arc::new(CronClock::new()))
    }

    /// Create a runner over a caller-supplied cron engine
    pub fn with_engine(config: RunnerConfig, engine: Arc<dyn CronEngine>) -> Result<Self> {
        if !time::validate_timezone(&config.default_timezone) {
            return Err(RunnerError::InvalidTimezone(config.default_timezone));
        }
        let store = match &config.storage_location {
            Some(path) => TaskStore::open(path)?,
            None => TaskStore::open_in_memory()?,
        };
        info!(
            storage = ?config.storage_location,
            default_timezone = %config.default_timezone,
            "TaskRunner created"
        );
        Ok(Self {
            inner: Arc::new(RunnerInner {
                store: Mutex::new(store),
                bus: Arc::new(EventBus::new()),
                scheduler: Scheduler::new(engine),
                registrations: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashSet::new()),
                retry_timers: Mutex::new(HashMap::new()),
                default_timezone: config.default_timezone,
                shutdown: AtomicBool::new(false),
            }),
        })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(RunnerError::Shutdown);
        }
        Ok(())
    }

    /// Validate a task config, persist its record, and arm its trigger
    ///
    /// Returns the task id. Fails with a validation error naming the
    /// violated rule; nothing is persisted on failure.
    pub async fn create_task(&self, config: TaskConfig, handler: Arc<dyn TaskHandler>) -> Result<String> {
        self.ensure_live()?;
        debug!(id = %config.id, kind = %config.kind, "TaskRunner::create_task");

        if config.id.trim().is_empty() {
            return Err(RunnerError::Validation("task id is required".to_string()));
        }
        if self.inner.store.lock().await.get_task(&config.id)?.is_some() {
            return Err(RunnerError::DuplicateTask(config.id));
        }

        let timezone = config
            .timezone
            .clone()
            .unwrap_or_else(|| self.inner.default_timezone.clone());
        if !time::validate_timezone(&timezone) {
            return Err(RunnerError::InvalidTimezone(timezone));
        }

        let descriptors = [&config.preset, &config.cron, &config.at, &config.after]
            .iter()
            .filter(|d| d.is_some())
            .count();
        match config.kind {
            TaskKind::Schedule => {
                if config.on_event.is_some() {
                    return Err(RunnerError::Validation(
                        "on_event is only valid for event tasks".to_string(),
                    ));
                }
                if descriptors != 1 {
                    return Err(RunnerError::Validation(
                        "schedule task requires exactly one of: preset, cron, at, after".to_string(),
                    ));
                }
            }
            TaskKind::Event => {
                if config.on_event.is_none() {
                    return Err(RunnerError::Validation("event task requires on_event".to_string()));
                }
                if descriptors != 0 {
                    return Err(RunnerError::Validation(
                        "event task cannot carry a schedule descriptor (preset/cron/at/after)".to_string(),
                    ));
                }
            }
        }

        // Resolve the descriptor once, at creation time
        let mut cron_expr: Option<String> = None;
        let mut run_at: Option<DateTime<Utc>> = None;
        if let Some(preset) = &config.preset {
            cron_expr = Some(scheduler::preset_expression(preset)?.to_string());
        } else if let Some(expression) = &config.cron {
            cron_expr = Some(scheduler::normalize_expression(expression)?);
        } else if let Some(raw) = &config.at {
            run_at = Some(time::resolve_absolute_time(raw, Some(&timezone))?.utc);
        } else if let Some(delay) = &config.after {
            run_at = Some(time::convert_after_to_at(delay)?);
        }

        let next_run_at = match &cron_expr {
            Some(expression) => scheduler::next_occurrence(expression, &timezone)?,
            None => run_at,
        };

        let status = if config.paused { TaskStatus::Paused } else { TaskStatus::Pending };
        let task = Task {
            id: config.id.clone(),
            name: config.name,
            kind: config.kind,
            cron: cron_expr,
            run_at,
            timezone,
            next_run_at,
            last_run_at: None,
            on_event: config.on_event,
            attempts: 0,
            max_attempts: config.max_attempts.max(1),
            rate_count: 0,
            rate_window: None,
            status,
            is_paused: config.paused,
            metadata: config.metadata,
            created_at: Utc::now(),
        };
        self.inner.store.lock().await.insert_task(&task)?;

        self.inner.registrations.write().await.insert(
            task.id.clone(),
            Registration {
                handler,
                retry: config.retry,
                rate_limit: config.rate_limit,
                subscription: None,
            },
        );

        if !config.paused {
            RunnerInner::arm_task(&self.inner, &task).await?;
        }

        info!(id = %task.id, kind = %task.kind, paused = config.paused, "task created");
        Ok(task.id)
    }

    /// Re-register the handler (and policies) for a stored task
    ///
    /// Required after a restart before `restore` can re-arm the task.
    pub async fn register_handler(
        &self,
        task_id: &str,
        handler: Arc<dyn TaskHandler>,
        retry: RetryPolicy,
        rate_limit: Option<RateLimit>,
    ) -> Result<()> {
        self.ensure_live()?;
        if self.inner.store.lock().await.get_task(task_id)?.is_none() {
            return Err(RunnerError::NotFound(task_id.to_string()));
        }
        self.inner.registrations.write().await.insert(
            task_id.to_string(),
            Registration {
                handler,
                retry,
                rate_limit,
                subscription: None,
            },
        );
        debug!(%task_id, "handler registered");
        Ok(())
    }

    /// Re-arm stored pending tasks whose handlers have been re-registered
    ///
    /// Tasks without a registered handler are logged and left pending —
    /// reconciliation is the owning application's explicit step, not
    /// automatic. Returns the number of tasks armed.
    pub async fn restore(&self) -> Result<usize> {
        self.ensure_live()?;
        let pending = self.inner.store.lock().await.pending_unpaused()?;
        let mut armed = 0usize;
        for task in pending {
            let registered = {
                let registrations = self.inner.registrations.read().await;
                match registrations.get(&task.id) {
                    Some(reg) => reg.subscription.is_none(),
                    None => {
                        warn!(id = %task.id, "no handler registered; task left pending");
                        continue;
                    }
                }
            };
            let already_armed = !registered || self.inner.scheduler.next_run(&task.id).await.is_some();
            if already_armed {
                continue;
            }
            RunnerInner::arm_task(&self.inner, &task).await?;
            armed += 1;
        }
        info!(armed, "restore complete");
        Ok(armed)
    }

    /// Pause a task: no further fires until resumed
    ///
    /// An execution already in flight is not interrupted.
    pub async fn pause_task(&self, task_id: &str) -> Result<()> {
        self.ensure_live()?;
        let task = self.get_required(task_id).await?;
        if task.is_paused {
            debug!(%task_id, "already paused");
            return Ok(());
        }

        self.inner
            .store
            .lock()
            .await
            .update_task(task_id, &TaskUpdate::new().status(TaskStatus::Paused))?;
        self.inner.scheduler.pause(task_id).await;
        if let Some(handle) = self.inner.retry_timers.lock().await.remove(task_id) {
            handle.abort();
        }
        if let Some(reg) = self.inner.registrations.write().await.get_mut(task_id) {
            if let Some(sub) = reg.subscription.take() {
                self.inner.bus.unsubscribe(&sub).await;
            }
        }
        info!(%task_id, "task paused");
        Ok(())
    }

    /// Resume a paused task and re-arm its trigger
    pub async fn resume_task(&self, task_id: &str) -> Result<()> {
        self.ensure_live()?;
        let task = self.get_required(task_id).await?;
        if !task.is_paused {
            debug!(%task_id, "not paused");
            return Ok(());
        }

        self.inner
            .store
            .lock()
            .await
            .update_task(task_id, &TaskUpdate::new().status(TaskStatus::Pending))?;

        if !self.inner.registrations.read().await.contains_key(task_id) {
            warn!(%task_id, "no handler registered; task left pending until re-registration");
            return Ok(());
        }

        // Prefer un-pausing a live cron handle; otherwise recompute and
        // re-arm from stored fields
        let resumed_in_place = task.cron.is_some() && self.inner.scheduler.resume_cron(task_id).await;
        if !resumed_in_place {
            let mut task = task;
            task.status = TaskStatus::Pending;
            task.is_paused = false;
            RunnerInner::arm_task(&self.inner, &task).await?;
        }
        info!(%task_id, "task resumed");
        Ok(())
    }

    /// Delete a task, detaching its trigger and cascading its executions
    pub async fn delete_task(&self, task_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.get_required(task_id).await?;
        RunnerInner::remove_task(&self.inner, task_id, "deleted by caller").await?;
        Ok(())
    }

    /// Look up a task record
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.inner.store.lock().await.get_task(task_id)?)
    }

    /// All task records
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.inner.store.lock().await.all_tasks()?)
    }

    /// Tasks in a given lifecycle state
    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self.inner.store.lock().await.tasks_by_status(status)?)
    }

    /// Execution history of a task, newest first
    pub async fn get_task_executions(&self, task_id: &str) -> Result<Vec<Execution>> {
        self.get_required(task_id).await?;
        Ok(self.inner.store.lock().await.executions_for_task(task_id)?)
    }

    /// Next fire time: live trigger value, else the stored field
    pub async fn get_next_run_time(&self, task_id: &str) -> Result<Option<DateTime<Utc>>> {
        let task = self.get_required(task_id).await?;
        if let Some(next) = self.inner.scheduler.next_run(task_id).await {
            return Ok(Some(next));
        }
        Ok(task.next_run_at)
    }

    /// Previous fire time: live trigger value, else the stored field
    pub async fn get_previous_run_time(&self, task_id: &str) -> Result<Option<DateTime<Utc>>> {
        let task = self.get_required(task_id).await?;
        if let Some(prev) = self.inner.scheduler.previous_run(task_id).await {
            return Ok(Some(prev));
        }
        Ok(task.last_run_at)
    }

    /// Publish an event, triggering any tasks subscribed to the topic
    ///
    /// Resolves once every subscriber callback has settled; triggered
    /// task executions run as spawned work and never block the caller.
    pub async fn publish_event(&self, topic: &str, data: EventData) -> Result<()> {
        self.ensure_live()?;
        self.inner.bus.publish(topic, data).await;
        Ok(())
    }

    /// Subscribe a plain callback to the bus
    pub async fn subscribe_to_event(&self, topic: &str, cb: SubscriberCallback) -> Result<Subscription> {
        self.ensure_live()?;
        Ok(self.inner.bus.subscribe(topic, cb).await)
    }

    /// Remove a bus subscription
    pub async fn unsubscribe_from_event(&self, sub: &Subscription) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.inner.bus.unsubscribe(sub).await)
    }

    /// Aggregate counts over tasks, armed triggers, and subscriptions
    pub async fn get_stats(&self) -> Result<RunnerStats> {
        let store_stats = self.inner.store.lock().await.stats()?;
        Ok(RunnerStats {
            total: store_stats.total,
            pending: store_stats.pending,
            running: store_stats.running,
            paused: store_stats.paused,
            armed_schedules: self.inner.scheduler.armed_count().await,
            event_subscriptions: self.inner.bus.subscriber_count(None).await,
        })
    }

    /// Detach every trigger and clear in-memory indices; idempotent
    ///
    /// Executions already in flight run to completion, but no further
    /// fires are delivered and subsequent operations fail with
    /// [`RunnerError::Shutdown`].
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("TaskRunner shutting down");
        self.inner.scheduler.shutdown().await;
        let mut retry_timers = self.inner.retry_timers.lock().await;
        for (_, handle) in retry_timers.drain() {
            handle.abort();
        }
        drop(retry_timers);
        self.inner.bus.clear().await;
        self.inner.registrations.write().await.clear();
        self.inner.in_flight.lock().await.clear();
    }

    async fn get_required(&self, task_id: &str) -> Result<Task> {
        self.inner
            .store
            .lock()
            .await
            .get_task(task_id)?
            .ok_or_else(|| RunnerError::NotFound(task_id.to_string()))
    }
}

impl RunnerInner {
    fn fire_callback(inner: &Arc<Self>) -> FireCallback {
        let weak = Arc::downgrade(inner);
        Arc::new(move |task_id: String| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    // Spawned so slow handlers delay neither the cron
                    // loop nor sibling fires
                    tokio::spawn(Self::execute(inner, task_id, Trigger::Schedule));
                }
            })
        })
    }

    /// Arm the trigger matching a task's stored descriptor
    async fn arm_task(inner: &Arc<Self>, task: &Task) -> Result<()> {
        match task.kind {
            TaskKind::Schedule => {
                if let Some(expression) = &task.cron {
                    inner
                        .scheduler
                        .arm_cron(&task.id, expression, &task.timezone, Self::fire_callback(inner))
                        .await?;
                } else if let Some(run_at) = task.run_at {
                    inner.scheduler.arm_one_shot(&task.id, run_at, Self::fire_callback(inner)).await;
                } else {
                    warn!(id = %task.id, "schedule task has no resolved descriptor, not armed");
                }
            }
            TaskKind::Event => {
                let Some(topic) = task.on_event.clone() else {
                    warn!(id = %task.id, "event task has no topic, not armed");
                    return Ok(());
                };
                let weak = Arc::downgrade(inner);
                let task_id = task.id.clone();
                let cb = callback(move |name: String, payload: EventData| {
                    let weak = weak.clone();
                    let task_id = task_id.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            tokio::spawn(Self::execute(inner, task_id, Trigger::Event { name, payload }));
                        }
                        Ok(())
                    }
                });
                let sub = inner.bus.subscribe(&topic, cb).await;
                if let Some(reg) = inner.registrations.write().await.get_mut(&task.id) {
                    reg.subscription = Some(sub);
                }
            }
        }
        Ok(())
    }

    /// One trigger fire: guard, rate-check, run, record the outcome
    ///
    /// Returns a boxed future so the recursive retry path (which spawns
    /// `execute` again) has a concretely `Send` type to hand to
    /// `tokio::spawn`, breaking the self-referential auto-trait cycle.
    fn execute(
        inner: Arc<Self>,
        task_id: String,
        trigger: Trigger,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            if inner.shutdown.load(Ordering::SeqCst) {
                return;
            }
            {
                let mut in_flight = inner.in_flight.lock().await;
                if !in_flight.insert(task_id.clone()) {
                    debug!(%task_id, "already running, fire dropped");
                    return;
                }
            }
            Self::run_once(&inner, &task_id, trigger).await;
            inner.in_flight.lock().await.remove(&task_id);
        })
    }

    async fn run_once(inner: &Arc<Self>, task_id: &str, trigger: Trigger) {
        let task = match inner.store.lock().await.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(%task_id, "unknown task, fire dropped");
                return;
            }
            Err(e) => {
                error!(%task_id, error = %e, "task lookup failed");
                return;
            }
        };
        if task.is_paused {
            debug!(%task_id, "task paused, fire dropped");
            return;
        }

        let Some(reg) = inner.registrations.read().await.get(task_id).cloned() else {
            warn!(%task_id, "no handler registered, run skipped");
            return;
        };

        if let Some(rate_limit) = &reg.rate_limit {
            let decision = {
                let store = inner.store.lock().await;
                rate_limit.check(&store, &task, Utc::now())
            };
            match decision {
                Ok(RateDecision::Proceed) => {}
                Ok(RateDecision::Skip) => {
                    info!(%task_id, "rate limited, run skipped");
                    return;
                }
                Err(e) => {
                    error!(%task_id, error = %e, "rate-limit check failed");
                    return;
                }
            }
        }

        let attempt = task.attempts + 1;
        let exec = Execution::begin(task_id, attempt);
        {
            let store = inner.store.lock().await;
            if let Err(e) = store.insert_execution(&exec) {
                error!(%task_id, error = %e, "failed to record execution");
                return;
            }
            if let Err(e) = store.update_task(
                task_id,
                &TaskUpdate::new().status(TaskStatus::Running).attempts(attempt),
            ) {
                error!(%task_id, error = %e, "failed to mark task running");
                return;
            }
        }

        debug!(%task_id, execution_id = %exec.id, attempt, "invoking handler");
        let ctx = TaskContext {
            task_id: task_id.to_string(),
            execution_id: exec.id.clone(),
            attempt,
            trigger: trigger.clone(),
        };
        let result = reg.handler.run(ctx).await;
        let now = Utc::now();

        match result {
            Ok(()) => {
                {
                    let store = inner.store.lock().await;
                    if let Err(e) = store.finalize_execution(&exec.id, ExecutionStatus::Success, None, now) {
                        error!(%task_id, error = %e, "failed to finalize execution");
                    }
                    let update = TaskUpdate::new().attempts(0).last_run_at(Some(now));
                    if !Self::settle_task(&store, task_id, update) {
                        // Deleted while the handler ran; nothing left to do
                        return;
                    }
                }
                info!(%task_id, execution_id = %exec.id, "execution succeeded");

                if Self::is_one_shot(&task) {
                    if let Err(e) = Self::remove_task(inner, task_id, "one-shot complete").await {
                        error!(%task_id, error = %e, "one-shot cleanup failed");
                    }
                } else if task.cron.is_some() {
                    if let Some(next) = inner.scheduler.next_run(task_id).await {
                        let store = inner.store.lock().await;
                        if let Err(e) = store.update_task(task_id, &TaskUpdate::new().next_run_at(Some(next))) {
                            debug!(%task_id, error = %e, "next-run bookkeeping skipped");
                        }
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(%task_id, execution_id = %exec.id, attempt, error = %message, "execution failed");
                {
                    let store = inner.store.lock().await;
                    if let Err(e) =
                        store.finalize_execution(&exec.id, ExecutionStatus::Failed, Some(&message), now)
                    {
                        error!(%task_id, error = %e, "failed to finalize execution");
                    }
                }
                Self::handle_failure(inner, &task, &reg.retry, attempt, trigger, now).await;
            }
        }
    }

    /// Return a task to pending after an execution, preserving a pause
    /// applied mid-flight; false if the task no longer exists.
    fn settle_task(store: &TaskStore, task_id: &str, update: TaskUpdate) -> bool {
        let current = match store.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(e) => {
                error!(%task_id, error = %e, "post-execution lookup failed");
                return false;
            }
        };
        let status = if current.is_paused { TaskStatus::Paused } else { TaskStatus::Pending };
        match store.update_task(task_id, &update.status(status)) {
            Ok(()) => true,
            Err(StoreError::TaskNotFound(_)) => false,
            Err(e) => {
                error!(%task_id, error = %e, "post-execution update failed");
                false
            }
        }
    }

    /// Apply retry policy after a failed execution
    ///
    /// `failures` is the consecutive-failure count including this one.
    async fn handle_failure(
        inner: &Arc<Self>,
        task: &Task,
        retry: &RetryPolicy,
        failures: u32,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) {
        let decision = retry.evaluate(failures, task.max_attempts, task.created_at, now);
        {
            let store = inner.store.lock().await;
            if !Self::settle_task(&store, &task.id, TaskUpdate::new()) {
                return;
            }
        }

        match decision {
            RetryDecision::Retry { delay_ms } => {
                info!(id = %task.id, failures, delay_ms, "scheduling retry");
                let weak = Arc::downgrade(inner);
                let task_id = task.id.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    if let Some(inner) = weak.upgrade() {
                        inner.retry_timers.lock().await.remove(&task_id);
                        Self::execute(inner, task_id, trigger).await;
                    }
                });
                let mut retry_timers = inner.retry_timers.lock().await;
                if let Some(old) = retry_timers.insert(task.id.clone(), handle) {
                    old.abort();
                }
            }
            RetryDecision::Exhausted => {
                info!(id = %task.id, failures, max_attempts = task.max_attempts, "retry attempts exhausted");
                Self::finish_failed_streak(inner, task).await;
            }
            RetryDecision::WindowExceeded => {
                warn!(id = %task.id, failures, "retry window exceeded, retry abandoned");
                Self::finish_failed_streak(inner, task).await;
            }
        }
    }

    /// A failure streak ended without another retry; one-shot tasks have
    /// nothing left to schedule and are removed.
    async fn finish_failed_streak(inner: &Arc<Self>, task: &Task) {
        if Self::is_one_shot(task) {
            if let Err(e) = Self::remove_task(inner, &task.id, "one-shot failed out").await {
                error!(id = %task.id, error = %e, "one-shot cleanup failed");
            }
        }
    }

    fn is_one_shot(task: &Task) -> bool {
        task.kind == TaskKind::Schedule && task.run_at.is_some()
    }

    /// Detach triggers and remove the task record and its executions
    async fn remove_task(inner: &Arc<Self>, task_id: &str, reason: &str) -> Result<()> {
        debug!(%task_id, reason, "removing task");
        inner.scheduler.disarm(task_id).await;
        if let Some(handle) = inner.retry_timers.lock().await.remove(task_id) {
            handle.abort();
        }
        if let Some(reg) = inner.registrations.write().await.remove(task_id) {
            if let Some(sub) = reg.subscription {
                inner.bus.unsubscribe(&sub).await;
            }
        }
        inner.store.lock().await.delete_task(task_id)?;
        Ok(())
    }
}
