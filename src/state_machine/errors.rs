use super::{TaskEvent, TaskStatus};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on event {event}")]
    InvalidTransition { from: TaskStatus, event: &'static str },
}

impl StateMachineError {
    pub fn invalid(from: TaskStatus, event: &TaskEvent) -> Self {
        Self::InvalidTransition {
            from,
            event: event.event_type(),
        }
    }
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
