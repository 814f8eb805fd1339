//! # Data Model
//!
//! Persisted task records, their append-only log stream, the typed task
//! configuration and the batch result payload.
//!
//! - [`task`] - `Task`, identifiers, kinds, priority, caller identity and the public `TaskView`
//! - [`task_config`] - the per-kind configuration union and batch evaluation scopes
//! - [`task_log`] - `TaskLogEntry` and `LogLevel`
//! - [`results`] - per-item records, batch summary and outcome
//! - [`query`] - filters, pagination and statistics projections

pub mod query;
pub mod results;
pub mod task;
pub mod task_config;
pub mod task_log;

pub use query::{Page, TaskQuery, TaskStatistics};
pub use results::{BatchOutcome, BatchSummary, ItemOutcomeStatus, ItemRecord, TaskResultData};
pub use task::{
    CallerIdentity, CreateTaskRequest, NewTask, Task, TaskId, TaskKind, TaskPriority, TaskView,
};
pub use task_config::{BatchEvaluationConfig, EvaluationScope, TaskConfig};
pub use task_log::{LogLevel, TaskLogEntry};
