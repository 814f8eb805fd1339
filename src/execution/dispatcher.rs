//! # Execution Dispatcher
//!
//! Routes a task to the executor registered for its kind, starts the run on the
//! runtime, registers its cancellable handle and reconciles the final status when
//! the executor errors or panics.
//!
//! Requests arrive on a bounded channel ([`DispatchQueue`]) and are consumed by
//! [`ExecutionDispatcher::run`]; [`ExecutionDispatcher::dispatch`] can also be called
//! directly.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{ExecutionContext, TaskExecutor};
use super::panic_message;
use crate::constants::{events, status_groups::CANCELLABLE_STATES, UNSUPPORTED_TASK_TYPE};
use crate::error::{Result, TaskforgeError};
use crate::events::EventPublisher;
use crate::logging::{log_error, log_task_operation};
use crate::models::{LogLevel, Task, TaskId, TaskKind};
use crate::registry::{CancelSignal, RuntimeHandle, TaskRuntimeRegistry};
use crate::reporter::{ProgressReporter, StoreReporter};
use crate::state_machine::TaskStatus;
use crate::store::{StatusUpdate, TaskStore};

/// What caused a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchTrigger {
    /// A PENDING task is started
    Created,
    /// The lifecycle service already moved the task back to RUNNING
    Resumed,
    Retried,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRequest {
    pub task_id: TaskId,
    pub trigger: DispatchTrigger,
}

impl DispatchRequest {
    pub fn created(task_id: TaskId) -> Self {
        Self {
            task_id,
            trigger: DispatchTrigger::Created,
        }
    }

    pub fn resumed(task_id: TaskId) -> Self {
        Self {
            task_id,
            trigger: DispatchTrigger::Resumed,
        }
    }

    pub fn retried(task_id: TaskId) -> Self {
        Self {
            task_id,
            trigger: DispatchTrigger::Retried,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A run was started
    Started { run_id: Uuid },
    /// Nothing to do, e.g. the task was cancelled while queued
    Skipped { status: Option<TaskStatus> },
    /// The task was failed without running
    Rejected { reason: String },
}

/// Sending half of the dispatch channel
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchRequest>,
}

impl DispatchQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DispatchRequest>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn submit(&self, request: DispatchRequest) -> Result<()> {
        self.sender
            .send(request)
            .await
            .map_err(|_| TaskforgeError::Interrupted("dispatcher is not running".to_string()))
    }
}

pub struct ExecutionDispatcher {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRuntimeRegistry>,
    events: EventPublisher,
    strategies: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl std::fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.strategies.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("ExecutionDispatcher")
            .field("kinds", &kinds)
            .field("running", &self.registry.running_count())
            .finish()
    }
}

impl ExecutionDispatcher {
    pub fn builder(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRuntimeRegistry>,
        events: EventPublisher,
    ) -> ExecutionDispatcherBuilder {
        ExecutionDispatcherBuilder {
            store,
            registry,
            events,
            strategies: HashMap::new(),
        }
    }

    pub fn supports(&self, kind: TaskKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Start a run of the task if its status allows it.
    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome> {
        let task_id = request.task_id;
        let Some(task) = self.store.find_task(&task_id).await? else {
            debug!(task_id = %task_id, "Dispatch for missing task");
            return Ok(DispatchOutcome::Skipped { status: None });
        };

        let Some(executor) = task
            .kind()
            .and_then(|kind| self.strategies.get(&kind))
            .cloned()
        else {
            return self.reject_unsupported(&task).await;
        };

        let task = match request.trigger {
            DispatchTrigger::Created => {
                let update = StatusUpdate::to(TaskStatus::Running).started_now();
                match self
                    .store
                    .transition_status(&task_id, &[TaskStatus::Pending], update)
                    .await?
                {
                    Some(task) => task,
                    None => {
                        return Ok(DispatchOutcome::Skipped {
                            status: Some(task.status),
                        })
                    }
                }
            }
            DispatchTrigger::Resumed | DispatchTrigger::Retried => {
                if task.status != TaskStatus::Running {
                    return Ok(DispatchOutcome::Skipped {
                        status: Some(task.status),
                    });
                }
                task
            }
        };

        let lease = self.registry.register(task_id, RuntimeHandle::new());

        // A cancel may have landed between the status change and registration
        let current = self.store.find_task(&task_id).await?;
        if !current
            .as_ref()
            .is_some_and(|task| task.status == TaskStatus::Running)
        {
            return Ok(DispatchOutcome::Skipped {
                status: current.map(|task| task.status),
            });
        }

        let run_id = lease.run_id();
        let reporter = Arc::new(StoreReporter::for_run(
            Arc::clone(&self.store),
            self.events.clone(),
            &lease,
        ));

        log_task_operation(
            match request.trigger {
                DispatchTrigger::Created => events::TASK_STARTED,
                DispatchTrigger::Resumed => events::TASK_RESUMED,
                DispatchTrigger::Retried => events::TASK_RETRY_REQUESTED,
            },
            Some(&task_id),
            Some(&task.task_type),
            TaskStatus::Running.as_str(),
            Some(executor.name()),
        );
        self.events.publish_task(&task);
        reporter
            .append_log(
                LogLevel::Info,
                &format!("Run {run_id} started with {}", executor.name()),
            )
            .await?;

        let ctx = ExecutionContext {
            caller: Arc::new(task.caller()),
            task,
            run_id,
            reporter: reporter.clone(),
            cancel: lease.signal().clone(),
        };

        tokio::spawn(async move {
            // Held for the whole run; dropping it unregisters the handle
            let _lease = lease;
            let outcome = AssertUnwindSafe(executor.execute(ctx)).catch_unwind().await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(panic) => Some(format!("executor panicked: {}", panic_message(&*panic))),
            };

            if let Some(message) = failure {
                log_error("dispatcher", "execute", &message, Some(&task_id.to_string()));
                if let Err(err) = reporter.append_log(LogLevel::Error, &message).await {
                    warn!(task_id = %task_id, error = %err, "Failed to persist error log");
                }
                if let Err(err) = reporter.finish(TaskStatus::Failed, Some(message)).await {
                    log_error("dispatcher", "finish", &err.to_string(), Some(&task_id.to_string()));
                }
            }
        });

        Ok(DispatchOutcome::Started { run_id })
    }

    async fn reject_unsupported(&self, task: &Task) -> Result<DispatchOutcome> {
        let reason = format!("{UNSUPPORTED_TASK_TYPE}: {}", task.task_type);
        let update = StatusUpdate::to(TaskStatus::Failed)
            .completed_now()
            .with_error(reason.clone());

        if let Some(failed) = self
            .store
            .transition_status(&task.task_id, CANCELLABLE_STATES, update)
            .await?
        {
            self.store
                .append_log(&task.task_id, LogLevel::Error, &reason)
                .await?;
            log_task_operation(
                events::TASK_FAILED,
                Some(&task.task_id),
                Some(&task.task_type),
                TaskStatus::Failed.as_str(),
                Some(&reason),
            );
            self.events.publish_task(&failed);
        }

        Ok(DispatchOutcome::Rejected { reason })
    }

    /// Consume dispatch requests until the channel closes or `shutdown` is cancelled.
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<DispatchRequest>,
        shutdown: CancelSignal,
    ) {
        info!("🚀 Dispatch loop started");
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            match self.dispatch(request).await {
                Ok(outcome) => debug!(
                    task_id = %request.task_id,
                    trigger = ?request.trigger,
                    outcome = ?outcome,
                    "Dispatch handled"
                ),
                Err(err) => log_error(
                    "dispatcher",
                    "dispatch",
                    &err.to_string(),
                    Some(&request.task_id.to_string()),
                ),
            }
        }
        info!("🛑 Dispatch loop stopped");
    }
}

/// Builds the strategy table. Adding a task kind means registering its executor here.
pub struct ExecutionDispatcherBuilder {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRuntimeRegistry>,
    events: EventPublisher,
    strategies: HashMap<TaskKind, Arc<dyn TaskExecutor>>,
}

impl ExecutionDispatcherBuilder {
    pub fn executor(mut self, kind: TaskKind, executor: Arc<dyn TaskExecutor>) -> Self {
        self.strategies.insert(kind, executor);
        self
    }

    /// Register one executor for several kinds
    pub fn executor_for(mut self, kinds: &[TaskKind], executor: Arc<dyn TaskExecutor>) -> Self {
        for kind in kinds {
            self.strategies.insert(*kind, Arc::clone(&executor));
        }
        self
    }

    pub fn build(self) -> ExecutionDispatcher {
        ExecutionDispatcher {
            store: self.store,
            registry: self.registry,
            events: self.events,
            strategies: self.strategies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskConfig, TaskPriority};
    use crate::store::InMemoryTaskStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedExecutor {
        behaviour: &'static str,
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(&self, ctx: ExecutionContext) -> Result<()> {
            match self.behaviour {
                "error" => Err(TaskforgeError::Resolution("nothing to do".to_string())),
                "panic" => panic!("boom"),
                _ => {
                    ctx.reporter.finish(TaskStatus::Completed, None).await?;
                    Ok(())
                }
            }
        }
    }

    async fn setup(
        task_type: &str,
        behaviour: &'static str,
    ) -> (ExecutionDispatcher, Arc<dyn TaskStore>, TaskId) {
        let store: Arc<dyn TaskStore> = InMemoryTaskStore::arc();
        let dispatcher = ExecutionDispatcher::builder(
            Arc::clone(&store),
            Arc::new(TaskRuntimeRegistry::new()),
            EventPublisher::default(),
        )
        .executor_for(&TaskKind::ALL, Arc::new(ScriptedExecutor { behaviour }))
        .build();

        let task = store
            .insert_task(NewTask {
                task_id: TaskId::new(),
                task_type: task_type.to_string(),
                name: "dispatch".to_string(),
                description: None,
                config: TaskConfig::Unrecognized(serde_json::json!({})),
                priority: TaskPriority::Normal,
                created_by: None,
            })
            .await
            .unwrap();
        (dispatcher, store, task.task_id)
    }

    async fn wait_for_status(store: &Arc<dyn TaskStore>, task_id: &TaskId, status: TaskStatus) {
        for _ in 0..200 {
            if store.get_task(task_id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task never reached {status}");
    }

    #[tokio::test]
    async fn test_unknown_type_fails_fast() {
        let (dispatcher, store, task_id) = setup("UNKNOWN_KIND", "ok").await;

        let outcome = dispatcher.dispatch(DispatchRequest::created(task_id)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));

        let task = store.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let logs = store.list_logs(&task_id).await.unwrap();
        assert!(logs
            .iter()
            .any(|log| log.level == LogLevel::Error && log.message.contains("unsupported task type")));
    }

    #[tokio::test]
    async fn test_executor_error_fails_task() {
        let (dispatcher, store, task_id) = setup("BATCH_EVALUATION", "error").await;
        dispatcher.dispatch(DispatchRequest::created(task_id)).await.unwrap();

        wait_for_status(&store, &task_id, TaskStatus::Failed).await;
        let task = store.get_task(&task_id).await.unwrap();
        assert!(task.error_message.unwrap().contains("nothing to do"));
    }

    #[tokio::test]
    async fn test_executor_panic_fails_task() {
        let (dispatcher, store, task_id) = setup("BATCH_EVALUATION", "panic").await;
        dispatcher.dispatch(DispatchRequest::created(task_id)).await.unwrap();

        wait_for_status(&store, &task_id, TaskStatus::Failed).await;
        let task = store.get_task(&task_id).await.unwrap();
        assert!(task.error_message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_executor_owns_success_status() {
        let (dispatcher, store, task_id) = setup("BATCH_EVALUATION", "ok").await;
        let outcome = dispatcher.dispatch(DispatchRequest::created(task_id)).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Started { .. }));
        wait_for_status(&store, &task_id, TaskStatus::Completed).await;
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_is_skipped() {
        let (dispatcher, store, task_id) = setup("BATCH_EVALUATION", "ok").await;
        store
            .transition_status(
                &task_id,
                &[TaskStatus::Pending],
                StatusUpdate::to(TaskStatus::Cancelled),
            )
            .await
            .unwrap();

        let outcome = dispatcher.dispatch(DispatchRequest::created(task_id)).await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Skipped {
                status: Some(TaskStatus::Cancelled)
            }
        );
    }
}
