//! # Execution
//!
//! ```text
//! DispatchQueue ──► ExecutionDispatcher ──► strategy table ──► TaskExecutor
//!                        │                                      │
//!                        ├─ registers RuntimeLease              ├─ ProgressReporter
//!                        └─ catches errors/panics → FAILED      └─ CancelSignal
//! ```
//!
//! - [`executor`] - the `TaskExecutor` strategy trait and its `ExecutionContext`
//! - [`dispatcher`] - task kind routing, run registration and failure reconciliation
//! - [`batch`] - the bounded-concurrency batch evaluation executor

pub mod batch;
pub mod dispatcher;
pub mod executor;

pub use batch::{BatchEvaluationExecutor, BatchSettings, RetryPolicy};
pub use dispatcher::{
    DispatchOutcome, DispatchQueue, DispatchRequest, DispatchTrigger, ExecutionDispatcher,
    ExecutionDispatcherBuilder,
};
pub use executor::{ExecutionContext, TaskExecutor};

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
