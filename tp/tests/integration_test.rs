//! Integration tests for the tempo runner
//!
//! These exercise end-to-end flows: event-triggered execution, retries,
//! rate limiting, one-shot self-deletion, and restart reconciliation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempo::{
    ExecutionStatus, RateLimit, RetryPolicy, RunnerConfig, TaskConfig, TaskRunner, TaskStatus,
    Trigger, handler_fn,
};

/// Poll a condition until it holds or ~3s pass
async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..150 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn tempo::TaskHandler> {
    handler_fn(move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

// =============================================================================
// Event-triggered execution
// =============================================================================

#[tokio::test]
async fn test_event_task_executes_on_publish() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    runner
        .create_task(
            TaskConfig::event("on-login", "user:login"),
            handler_fn({
                let counter = counter.clone();
                move |ctx| {
                    let counter = counter.clone();
                    async move {
                        match ctx.trigger {
                            Trigger::Event { name, payload } => {
                                assert_eq!(name, "user:login");
                                assert_eq!(payload, serde_json::json!({"user": "ada"}));
                            }
                            Trigger::Schedule => panic!("expected event trigger"),
                        }
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            }),
        )
        .await
        .unwrap();

    runner.publish_event("user:login", serde_json::json!({"user": "ada"})).await.unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move {
            r.get_task_executions("on-login")
                .await
                .map(|execs| execs.iter().any(|e| e.status == ExecutionStatus::Success))
                .unwrap_or(false)
        })
        .await,
        "execution never succeeded"
    );

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let task = runner.get_task("on-login").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 0);
    assert!(task.last_run_at.is_some());
    runner.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_event_task_matches_glob() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(TaskConfig::event("user-watch", "user:*"), counting_handler(counter.clone()))
        .await
        .unwrap();

    runner.publish_event("user:login", serde_json::Value::Null).await.unwrap();
    runner.publish_event("admin:login", serde_json::Value::Null).await.unwrap();

    let counter_check = counter.clone();
    assert!(eventually(move || {
        let counter = counter_check.clone();
        async move { counter.load(Ordering::SeqCst) >= 1 }
    })
    .await);

    // Give the non-matching publish a chance to (wrongly) land
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_paused_event_task_does_not_fire() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(TaskConfig::event("t", "topic"), counting_handler(counter.clone()))
        .await
        .unwrap();

    runner.pause_task("t").await.unwrap();
    runner.publish_event("topic", serde_json::Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);

    runner.resume_task("t").await.unwrap();
    runner.publish_event("topic", serde_json::Value::Null).await.unwrap();
    let counter_check = counter.clone();
    assert!(eventually(move || {
        let counter = counter_check.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await);
    runner.shutdown().await;
}

// =============================================================================
// Failure handling and retries
// =============================================================================

#[tokio::test]
async fn test_failing_handler_records_error_without_retry() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    runner
        .create_task(
            TaskConfig::event("boomer", "go").max_attempts(1),
            handler_fn(|_ctx| async { Err(eyre::eyre!("boom")) }),
        )
        .await
        .unwrap();

    runner.publish_event("go", serde_json::Value::Null).await.unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move {
            r.get_task_executions("boomer")
                .await
                .map(|execs| execs.iter().any(|e| e.status == ExecutionStatus::Failed))
                .unwrap_or(false)
        })
        .await
    );

    // No retry is armed with max_attempts = 1
    tokio::time::sleep(Duration::from_millis(200)).await;
    let execs = runner.get_task_executions("boomer").await.unwrap();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].status, ExecutionStatus::Failed);
    assert_eq!(execs[0].error.as_deref(), Some("boom"));
    assert_eq!(execs[0].attempt, 1);

    let task = runner.get_task("boomer").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 1);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_retries_run_until_attempts_exhausted() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    runner
        .create_task(
            TaskConfig::event("flaky", "go")
                .max_attempts(3)
                .retry(RetryPolicy::exponential(20)),
            handler_fn(|_ctx| async { Err(eyre::eyre!("still broken")) }),
        )
        .await
        .unwrap();

    runner.publish_event("go", serde_json::Value::Null).await.unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move {
            r.get_task_executions("flaky").await.map(|execs| execs.len() == 3).unwrap_or(false)
        })
        .await,
        "expected three attempts"
    );

    // The streak is over; no further executions appear
    tokio::time::sleep(Duration::from_millis(300)).await;
    let execs = runner.get_task_executions("flaky").await.unwrap();
    assert_eq!(execs.len(), 3);
    let mut attempts: Vec<u32> = execs.iter().map(|e| e.attempt).collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2, 3]);

    let task = runner.get_task("flaky").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 3);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_success_after_retry_resets_attempts() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(
            TaskConfig::event("recovers", "go").max_attempts(3).retry(RetryPolicy::fixed(20)),
            handler_fn({
                let calls = calls.clone();
                move |_ctx| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(eyre::eyre!("first time fails"))
                        } else {
                            Ok(())
                        }
                    }
                }
            }),
        )
        .await
        .unwrap();

    runner.publish_event("go", serde_json::Value::Null).await.unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move {
            r.get_task("recovers")
                .await
                .ok()
                .flatten()
                .map(|t| t.attempts == 0 && t.last_run_at.is_some())
                .unwrap_or(false)
        })
        .await
    );

    let execs = runner.get_task_executions("recovers").await.unwrap();
    assert_eq!(execs.len(), 2);
    assert!(execs.iter().any(|e| e.status == ExecutionStatus::Failed));
    assert!(execs.iter().any(|e| e.status == ExecutionStatus::Success));
    runner.shutdown().await;
}

// =============================================================================
// Concurrency guard and rate limiting
// =============================================================================

#[tokio::test]
async fn test_in_flight_guard_drops_reentrant_fires() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(
            TaskConfig::event("slow", "go"),
            handler_fn({
                let counter = counter.clone();
                move |_ctx| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(())
                    }
                }
            }),
        )
        .await
        .unwrap();

    // Second publish lands while the first execution is in flight
    runner.publish_event("go", serde_json::Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    runner.publish_event("go", serde_json::Value::Null).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1, "re-entrant fire should be dropped");
    assert_eq!(runner.get_task_executions("slow").await.unwrap().len(), 1);

    // After completion the task fires again normally
    runner.publish_event("go", serde_json::Value::Null).await.unwrap();
    let counter_check = counter.clone();
    assert!(eventually(move || {
        let counter = counter_check.clone();
        async move { counter.load(Ordering::SeqCst) == 2 }
    })
    .await);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_sliding_rate_limit_skips_excess_runs() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(
            TaskConfig::event("limited", "go").rate_limit(RateLimit::sliding(2, 60_000)),
            counting_handler(counter.clone()),
        )
        .await
        .unwrap();

    for round in 1..=2 {
        runner.publish_event("go", serde_json::Value::Null).await.unwrap();
        let counter_check = counter.clone();
        assert!(eventually(move || {
            let counter = counter_check.clone();
            async move { counter.load(Ordering::SeqCst) >= round }
        })
        .await);
    }

    // Third run inside the trailing window is skipped, not queued
    runner.publish_event("go", serde_json::Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(runner.get_task_executions("limited").await.unwrap().len(), 2);

    // A skip does not mark the task failed
    let task = runner.get_task("limited").await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.attempts, 0);
    runner.shutdown().await;
}

// =============================================================================
// One-shot schedule tasks
// =============================================================================

#[tokio::test]
async fn test_one_shot_after_task_runs_and_self_deletes() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(TaskConfig::schedule("once").after("50ms"), counting_handler(counter.clone()))
        .await
        .unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move { r.get_task("once").await.map(|t| t.is_none()).unwrap_or(false) }).await,
        "one-shot task should delete itself"
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(runner.get_stats().await.unwrap().total, 0);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_one_shot_past_target_fires_immediately() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .create_task(
            TaskConfig::schedule("overdue").at("2020-01-01T00:00:00"),
            counting_handler(counter.clone()),
        )
        .await
        .unwrap();

    let counter_check = counter.clone();
    assert!(eventually(move || {
        let counter = counter_check.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await);
    runner.shutdown().await;
}

#[tokio::test]
async fn test_failed_one_shot_still_deletes_after_streak() {
    let runner = TaskRunner::new(RunnerConfig::default()).unwrap();
    runner
        .create_task(
            TaskConfig::schedule("doomed").after("30ms").max_attempts(2).retry(RetryPolicy::fixed(20)),
            handler_fn(|_ctx| async { Err(eyre::eyre!("never works")) }),
        )
        .await
        .unwrap();

    let r = &runner;
    assert!(
        eventually(move || async move { r.get_task("doomed").await.map(|t| t.is_none()).unwrap_or(false) }).await,
        "failed one-shot should delete itself once retries are exhausted"
    );
    runner.shutdown().await;
}

// =============================================================================
// Restart reconciliation
// =============================================================================

#[tokio::test]
async fn test_restore_rearms_registered_tasks_after_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("tempo.db");

    {
        let runner = TaskRunner::new(RunnerConfig::at(&path)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        runner
            .create_task(TaskConfig::event("on-login", "user:login"), counting_handler(counter.clone()))
            .await
            .unwrap();
        runner
            .create_task(
                TaskConfig::schedule("nightly").preset("@daily"),
                counting_handler(counter.clone()),
            )
            .await
            .unwrap();
        runner.shutdown().await;
    }

    // New process: records survive, handlers do not
    let runner = TaskRunner::new(RunnerConfig::at(&path)).unwrap();
    assert_eq!(runner.get_stats().await.unwrap().total, 2);

    // Without re-registration nothing is re-armed
    assert_eq!(runner.restore().await.unwrap(), 0);
    assert_eq!(runner.get_stats().await.unwrap().armed_schedules, 0);

    let counter = Arc::new(AtomicUsize::new(0));
    runner
        .register_handler("on-login", counting_handler(counter.clone()), RetryPolicy::default(), None)
        .await
        .unwrap();
    runner
        .register_handler("nightly", counting_handler(counter.clone()), RetryPolicy::default(), None)
        .await
        .unwrap();
    assert_eq!(runner.restore().await.unwrap(), 2);

    let stats = runner.get_stats().await.unwrap();
    assert_eq!(stats.armed_schedules, 1);
    assert_eq!(stats.event_subscriptions, 1);

    runner.publish_event("user:login", serde_json::Value::Null).await.unwrap();
    let counter_check = counter.clone();
    assert!(eventually(move || {
        let counter = counter_check.clone();
        async move { counter.load(Ordering::SeqCst) == 1 }
    })
    .await);
    runner.shutdown().await;
}
