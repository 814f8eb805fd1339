use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Dispatcher picked the task up
    Start,
    /// Soft pause requested
    Pause,
    /// Resume a paused task
    Resume,
    /// Cancel from any non-terminal status
    Cancel,
    /// Start a new run of a failed or cancelled task
    Retry,
    /// Run finished with no failed items
    Complete,
    /// Run finished with a mix of successes and failures
    CompleteWithErrors,
    /// Run failed with error message
    Fail(String),
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
            Self::Complete => "complete",
            Self::CompleteWithErrors => "complete_with_errors",
            Self::Fail(_) => "fail",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
