use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{CallerIdentity, Task};
use crate::registry::CancelSignal;
use crate::reporter::ProgressReporter;

/// Everything one run of a task gets to work with
#[derive(Clone)]
pub struct ExecutionContext {
    /// Snapshot of the task as it was when the run started
    pub task: Task,
    pub run_id: Uuid,
    /// Identity captured at creation, passed to every item-level call
    pub caller: Arc<CallerIdentity>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub cancel: CancelSignal,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("task_id", &self.task.task_id)
            .field("run_id", &self.run_id)
            .field("caller", &self.caller)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Strategy for executing one kind of task.
///
/// The executor owns the outcome: it reports progress and settles the final status
/// through the reporter. Returning `Err` (or panicking) makes the dispatcher mark the
/// task FAILED with the error message.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: ExecutionContext) -> Result<()>;
}
