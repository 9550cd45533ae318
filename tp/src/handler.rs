//! Task handler capability
//!
//! Handlers are supplied by the caller as plain async functions and held
//! only in memory; after a restart the owning application re-registers
//! them before resuming execution. They are never persisted.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::EventData;

/// What fired a task
#[derive(Debug, Clone)]
pub enum Trigger {
    /// A timer or cron tick; carries no arguments
    Schedule,
    /// An event publish; carries the triggering event name and payload
    Event {
        name: String,
        payload: EventData,
    },
}

/// Context handed to a handler for one execution
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// The task being executed
    pub task_id: String,
    /// The execution record allocated for this run
    pub execution_id: String,
    /// 1-based ordinal within the task's current failure streak
    pub attempt: u32,
    /// What fired this run
    pub trigger: Trigger,
}

/// The unit of work a task executes
///
/// A returned error finalizes the execution as failed and feeds the
/// retry controller; it never reaches the caller that triggered the run.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run one execution
    async fn run(&self, ctx: TaskContext) -> eyre::Result<()>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    async fn run(&self, ctx: TaskContext) -> eyre::Result<()> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`TaskHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = eyre::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule_ctx() -> TaskContext {
        TaskContext {
            task_id: "t-1".to_string(),
            execution_id: "e-1".to_string(),
            attempt: 1,
            trigger: Trigger::Schedule,
        }
    }

    #[tokio::test]
    async fn test_handler_fn_runs_closure() {
        let handler = handler_fn(|ctx| async move {
            assert_eq!(ctx.task_id, "t-1");
            Ok(())
        });
        handler.run(schedule_ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|_ctx| async { Err(eyre::eyre!("boom")) });
        let err = handler.run(schedule_ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_event_trigger_carries_payload() {
        let handler = handler_fn(|ctx| async move {
            match ctx.trigger {
                Trigger::Event { name, payload } => {
                    assert_eq!(name, "user:login");
                    assert_eq!(payload, serde_json::json!({"user": "ada"}));
                    Ok(())
                }
                Trigger::Schedule => Err(eyre::eyre!("expected event trigger")),
            }
        });
        let ctx = TaskContext {
            trigger: Trigger::Event {
                name: "user:login".to_string(),
                payload: serde_json::json!({"user": "ada"}),
            },
            ..schedule_ctx()
        };
        handler.run(ctx).await.unwrap();
    }
}
