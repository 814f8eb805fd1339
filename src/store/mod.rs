//! # Task Store
//!
//! Single source of truth for task status, progress, result data and log lines.
//!
//! Every method is its own atomic unit: status changes are compare-and-set on the
//! status the caller decided from, progress writes are monotonic and only land while
//! a run is active, and log appends never wait on anything else. No call holds a
//! transaction open across a run, so many item workers can write to one task without
//! blocking each other.

pub mod memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Result, TaskforgeError};
use crate::models::{
    LogLevel, NewTask, Page, Task, TaskId, TaskLogEntry, TaskQuery, TaskResultData,
};
use crate::state_machine::TaskStatus;

pub use memory::InMemoryTaskStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgTaskStore;

/// How a nullable column changes as part of a status transition
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> FieldUpdate<T> {
    pub fn apply(&self, field: &mut Option<T>) {
        match self {
            Self::Keep => {}
            Self::Set(value) => *field = Some(value.clone()),
            Self::Clear => *field = None,
        }
    }
}

/// Column changes that accompany a status transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    pub started_at: FieldUpdate<DateTime<Utc>>,
    pub completed_at: FieldUpdate<DateTime<Utc>>,
    pub error_message: FieldUpdate<String>,
    /// Zero `processed_count` and drop `result_data`, for a fresh run
    pub reset_progress: bool,
}

impl StatusUpdate {
    pub fn to(status: TaskStatus) -> Self {
        Self {
            status,
            started_at: FieldUpdate::Keep,
            completed_at: FieldUpdate::Keep,
            error_message: FieldUpdate::Keep,
            reset_progress: false,
        }
    }

    pub fn started_now(mut self) -> Self {
        self.started_at = FieldUpdate::Set(Utc::now());
        self
    }

    pub fn completed_now(mut self) -> Self {
        self.completed_at = FieldUpdate::Set(Utc::now());
        self
    }

    pub fn clear_completed(mut self) -> Self {
        self.completed_at = FieldUpdate::Clear;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = FieldUpdate::Set(message.into());
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = FieldUpdate::Clear;
        self
    }

    pub fn reset_progress(mut self) -> Self {
        self.reset_progress = true;
        self
    }

    /// Apply to an in-memory record. The status precondition is the caller's job.
    pub fn apply_to(&self, task: &mut Task) {
        task.status = self.status;
        self.started_at.apply(&mut task.started_at);
        self.completed_at.apply(&mut task.completed_at);
        self.error_message.apply(&mut task.error_message);
        if self.reset_progress {
            task.processed_count = 0;
            task.result_data = None;
        }
        task.updated_at = Utc::now();
    }
}

/// Statuses a result payload may still be written in. A cancelled run saves
/// what its in-flight items produced.
pub const RESULT_WRITABLE_STATES: &[TaskStatus] =
    &[TaskStatus::Running, TaskStatus::Paused, TaskStatus::Cancelled];

/// Persistence contract for tasks and their logs
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Insert a new PENDING task
    async fn insert_task(&self, new_task: NewTask) -> Result<Task>;

    async fn find_task(&self, task_id: &TaskId) -> Result<Option<Task>>;

    /// Filtered listing, newest first
    async fn list_tasks(&self, query: &TaskQuery) -> Result<Page<Task>>;

    /// Most recently created tasks, newest first
    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>>;

    /// Count of tasks per status. Statuses with no tasks may be omitted.
    async fn status_counts(&self) -> Result<Vec<(TaskStatus, u64)>>;

    async fn task_ids_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskId>>;

    /// Compare-and-set: apply `update` only if the current status is in `expected`.
    ///
    /// Returns the updated task, or `None` when the precondition did not hold or the
    /// task does not exist.
    async fn transition_status(
        &self,
        task_id: &TaskId,
        expected: &[TaskStatus],
        update: StatusUpdate,
    ) -> Result<Option<Task>>;

    /// Record progress of the current run.
    ///
    /// Only lands while the task is RUNNING or PAUSED. `processed_count` never moves
    /// backwards and never exceeds `total`.
    async fn update_progress(&self, task_id: &TaskId, processed: i64, total: i64)
        -> Result<Option<Task>>;

    /// Store the result payload while the status is one of [`RESULT_WRITABLE_STATES`].
    async fn save_result(&self, task_id: &TaskId, result: &TaskResultData) -> Result<bool>;

    /// Append a log line. Fails with `NotFound` when the task does not exist.
    async fn append_log(&self, task_id: &TaskId, level: LogLevel, message: &str)
        -> Result<TaskLogEntry>;

    /// Log lines in creation order
    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<TaskLogEntry>>;

    /// Delete a task and its logs unless its status is in `blocked`.
    ///
    /// Returns whether a row was removed.
    async fn delete_task(&self, task_id: &TaskId, blocked: &[TaskStatus]) -> Result<bool>;

    /// Like [`TaskStore::find_task`] but a missing task is an error
    async fn get_task(&self, task_id: &TaskId) -> Result<Task> {
        self.find_task(task_id)
            .await?
            .ok_or_else(|| TaskforgeError::task_not_found(task_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_update_apply() {
        let mut field = Some("old".to_string());
        FieldUpdate::Keep.apply(&mut field);
        assert_eq!(field.as_deref(), Some("old"));
        FieldUpdate::Set("new".to_string()).apply(&mut field);
        assert_eq!(field.as_deref(), Some("new"));
        FieldUpdate::<String>::Clear.apply(&mut field);
        assert!(field.is_none());
    }
}
