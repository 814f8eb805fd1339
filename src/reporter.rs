//! # Progress Reporter
//!
//! The narrow write surface an executor gets: report progress, append a log line,
//! save the result payload and settle the final status. Executors never see the
//! lifecycle service or the dispatcher.
//!
//! [`StoreReporter`] writes through to the [`TaskStore`] and broadcasts a status
//! message after each write that changed the task. A reporter bound to a run stops
//! writing progress or status once that run is cancelled or superseded by a newer
//! run of the same task.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::constants::{events, status_groups::ACTIVE_STATES};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::logging::log_task_operation;
use crate::models::{LogLevel, TaskId, TaskResultData};
use crate::registry::{CancelSignal, RuntimeLease, TaskRuntimeRegistry};
use crate::state_machine::TaskStatus;
use crate::store::{StatusUpdate, TaskStore};

#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Persist `processed` of `total`. Returns whether the write landed.
    async fn report_progress(&self, processed: usize, total: usize) -> Result<bool>;

    async fn append_log(&self, level: LogLevel, message: &str) -> Result<()>;

    async fn save_result(&self, result: &TaskResultData) -> Result<bool>;

    /// Settle a RUNNING or PAUSED task into its final status. Returns whether it applied.
    async fn finish(&self, status: TaskStatus, error_message: Option<String>) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct RunGuard {
    registry: Arc<TaskRuntimeRegistry>,
    run_id: Uuid,
    signal: CancelSignal,
}

/// Reporter backed by the task store
#[derive(Clone)]
pub struct StoreReporter {
    store: Arc<dyn TaskStore>,
    events: EventPublisher,
    task_id: TaskId,
    guard: Option<RunGuard>,
}

impl std::fmt::Debug for StoreReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReporter")
            .field("task_id", &self.task_id)
            .field("run_id", &self.guard.as_ref().map(|g| g.run_id))
            .finish()
    }
}

impl StoreReporter {
    /// Reporter for one run of a task
    pub fn for_run(store: Arc<dyn TaskStore>, events: EventPublisher, lease: &RuntimeLease) -> Self {
        Self {
            store,
            events,
            task_id: lease.task_id(),
            guard: Some(RunGuard {
                registry: Arc::clone(lease.registry()),
                run_id: lease.run_id(),
                signal: lease.signal().clone(),
            }),
        }
    }

    /// Reporter not tied to a run, for writes made outside of execution
    pub fn detached(store: Arc<dyn TaskStore>, events: EventPublisher, task_id: TaskId) -> Self {
        Self {
            store,
            events,
            task_id,
            guard: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn is_current_run(&self) -> bool {
        self.guard
            .as_ref()
            .map_or(true, |guard| guard.registry.is_current(&self.task_id, guard.run_id))
    }

    fn is_cancelled(&self) -> bool {
        self.guard
            .as_ref()
            .is_some_and(|guard| guard.signal.is_cancelled())
    }
}

#[async_trait]
impl ProgressReporter for StoreReporter {
    async fn report_progress(&self, processed: usize, total: usize) -> Result<bool> {
        if self.is_cancelled() || !self.is_current_run() {
            debug!(task_id = %self.task_id, processed, total, "Skipping progress for stopped run");
            return Ok(false);
        }

        let updated = self
            .store
            .update_progress(&self.task_id, processed as i64, total as i64)
            .await?;

        match updated {
            Some(task) => {
                debug!(
                    operation = events::TASK_PROGRESS,
                    task_id = %self.task_id,
                    processed = task.processed_count,
                    total = task.total_count,
                    "Progress persisted"
                );
                self.events.publish_task(&task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_log(&self, level: LogLevel, message: &str) -> Result<()> {
        self.store.append_log(&self.task_id, level, message).await?;
        Ok(())
    }

    async fn save_result(&self, result: &TaskResultData) -> Result<bool> {
        if !self.is_current_run() {
            return Ok(false);
        }
        self.store.save_result(&self.task_id, result).await
    }

    async fn finish(&self, status: TaskStatus, error_message: Option<String>) -> Result<bool> {
        if self.is_cancelled() || !self.is_current_run() {
            return Ok(false);
        }

        let mut update = StatusUpdate::to(status).completed_now();
        if let Some(message) = &error_message {
            update = update.with_error(message.clone());
        }

        let Some(task) = self
            .store
            .transition_status(&self.task_id, ACTIVE_STATES, update)
            .await?
        else {
            return Ok(false);
        };

        let operation = match status {
            TaskStatus::Failed => events::TASK_FAILED,
            TaskStatus::Cancelled => events::TASK_CANCELLED,
            _ => events::TASK_COMPLETED,
        };
        log_task_operation(
            operation,
            Some(&self.task_id),
            Some(&task.task_type),
            status.as_str(),
            error_message.as_deref(),
        );
        self.events.publish_task(&task);
        Ok(true)
    }
}
