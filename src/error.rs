//! # Error Handling
//!
//! One error enum for the whole engine. Lifecycle callers see `Validation`,
//! `IllegalState` and `NotFound` synchronously; `Resolution` aborts a run before
//! fan-out; `ItemExecution` never escapes a batch (it is folded into the item's
//! record); `Persistence` is fatal to the call that triggered it.

use crate::state_machine::TaskStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskforgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Illegal state transition: cannot {action} task {task_id} while it is {from}")]
    IllegalState {
        task_id: String,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Item {item_id} failed after {attempts} attempt(s): {message}")]
    ItemExecution {
        item_id: i64,
        attempts: u32,
        message: String,
    },

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TaskforgeError {
    /// True for errors caused by the caller's request rather than the engine.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::IllegalState { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn task_not_found(task_id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("task {task_id}"))
    }
}

impl From<sqlx::Error> for TaskforgeError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for TaskforgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for TaskforgeError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TaskforgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn illegal_state_reads_naturally() {
        let err = TaskforgeError::IllegalState {
            task_id: "abc".to_string(),
            from: TaskStatus::Completed,
            action: "pause",
        };
        assert_eq!(
            err.to_string(),
            "Illegal state transition: cannot pause task abc while it is COMPLETED"
        );
        assert!(err.is_validation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn serde_errors_become_serialization_errors() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TaskforgeError = parse_err.into();
        assert!(matches!(err, TaskforgeError::Serialization(_)));
    }
}
