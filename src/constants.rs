//! # System Constants
//!
//! Event names, status groupings and engine defaults shared across the crate.

pub use crate::state_machine::TaskStatus;

/// Lifecycle event names, used as the `operation` field of structured logs.
pub mod events {
    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_PAUSED: &str = "task.paused";
    pub const TASK_RESUMED: &str = "task.resumed";
    pub const TASK_CANCELLED: &str = "task.cancelled";
    pub const TASK_RETRY_REQUESTED: &str = "task.retry_requested";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_DELETED: &str = "task.deleted";
    pub const TASK_PROGRESS: &str = "task.progress";
    pub const TASK_RECOVERED: &str = "task.recovered";
}

/// Engine defaults. Every value can be overridden through configuration.
pub mod defaults {
    /// Simultaneous in-flight evaluations per batch.
    pub const MAX_CONCURRENT_ITEMS: usize = 3;

    /// Attempts per work item, first attempt included.
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Linear backoff unit; retry `n` waits `n` units.
    pub const RETRY_BASE_DELAY_MS: u64 = 1000;

    /// Persist progress every N item completions.
    pub const PROGRESS_REPORT_INTERVAL: usize = 20;

    pub const DISPATCH_CHANNEL_CAPACITY: usize = 256;

    pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

    pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;

    pub const RECENT_TASKS_LIMIT: usize = 10;

    pub const MAX_PAGE_SIZE: usize = 500;
}

/// Status groupings for validation and bulk operations
pub mod status_groups {
    use super::TaskStatus;

    /// Statuses a run can end in.
    pub const TERMINAL_STATES: &[TaskStatus] = &[
        TaskStatus::Completed,
        TaskStatus::CompletedWithErrors,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Statuses in which a run may still be writing progress.
    pub const ACTIVE_STATES: &[TaskStatus] = &[TaskStatus::Running, TaskStatus::Paused];

    /// Statuses a task can be cancelled from.
    pub const CANCELLABLE_STATES: &[TaskStatus] =
        &[TaskStatus::Pending, TaskStatus::Running, TaskStatus::Paused];

    /// Statuses a task can be retried from.
    pub const RETRYABLE_STATES: &[TaskStatus] = &[TaskStatus::Failed, TaskStatus::Cancelled];
}

/// Message prefix for tasks whose type has no registered executor.
pub const UNSUPPORTED_TASK_TYPE: &str = "unsupported task type";

/// Failure message stamped on tasks left RUNNING by a previous process.
pub const ORPHANED_TASK_MESSAGE: &str = "engine restarted while task was running";
