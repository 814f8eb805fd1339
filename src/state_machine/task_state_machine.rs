use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    states::TaskStatus,
};

/// Determine the target state based on current state and event
pub fn determine_target_state(
    current_state: TaskStatus,
    event: &TaskEvent,
) -> StateMachineResult<TaskStatus> {
    let target = match (current_state, event) {
        (TaskStatus::Pending, TaskEvent::Start) => TaskStatus::Running,

        (TaskStatus::Running, TaskEvent::Pause) => TaskStatus::Paused,
        (TaskStatus::Paused, TaskEvent::Resume) => TaskStatus::Running,

        (TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused, TaskEvent::Cancel) => {
            TaskStatus::Cancelled
        }

        (TaskStatus::Failed | TaskStatus::Cancelled, TaskEvent::Retry) => TaskStatus::Running,

        // A soft-paused run keeps going and is allowed to finish
        (TaskStatus::Running | TaskStatus::Paused, TaskEvent::Complete) => TaskStatus::Completed,
        (TaskStatus::Running | TaskStatus::Paused, TaskEvent::CompleteWithErrors) => {
            TaskStatus::CompletedWithErrors
        }

        (TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused, TaskEvent::Fail(_)) => {
            TaskStatus::Failed
        }

        (from, event) => return Err(StateMachineError::invalid(from, event)),
    };

    Ok(target)
}

/// In-memory view of one task's status, advanced by events.
///
/// Used where a caller wants to walk a sequence of events without touching the
/// store, e.g. to validate a transition before issuing the compare-and-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskStateMachine {
    current: TaskStatus,
}

impl TaskStateMachine {
    pub fn new(current: TaskStatus) -> Self {
        Self { current }
    }

    pub fn current_state(&self) -> TaskStatus {
        self.current
    }

    pub fn can_transition(&self, event: &TaskEvent) -> bool {
        determine_target_state(self.current, event).is_ok()
    }

    /// Attempt to transition the task state
    pub fn transition(&mut self, event: &TaskEvent) -> StateMachineResult<TaskStatus> {
        let target = determine_target_state(self.current, event)?;
        self.current = target;
        Ok(target)
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new(TaskStatus::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut machine = TaskStateMachine::default();
        assert_eq!(machine.transition(&TaskEvent::Start), Ok(TaskStatus::Running));
        assert_eq!(machine.transition(&TaskEvent::Pause), Ok(TaskStatus::Paused));
        assert_eq!(machine.transition(&TaskEvent::Resume), Ok(TaskStatus::Running));
        assert_eq!(
            machine.transition(&TaskEvent::Complete),
            Ok(TaskStatus::Completed)
        );
    }

    #[test]
    fn test_pause_only_from_running() {
        for status in TaskStatus::ALL {
            let result = determine_target_state(status, &TaskEvent::Pause);
            assert_eq!(result.is_ok(), status == TaskStatus::Running, "{status}");
        }
    }

    #[test]
    fn test_resume_only_from_paused() {
        for status in TaskStatus::ALL {
            let result = determine_target_state(status, &TaskEvent::Resume);
            assert_eq!(result.is_ok(), status == TaskStatus::Paused, "{status}");
        }
    }

    #[test]
    fn test_retry_only_from_failed_or_cancelled() {
        for status in TaskStatus::ALL {
            let result = determine_target_state(status, &TaskEvent::Retry);
            assert_eq!(result.is_ok(), status.is_retryable(), "{status}");
        }
    }

    #[test]
    fn test_completed_cannot_reenter_running() {
        let machine = TaskStateMachine::new(TaskStatus::Completed);
        for event in [
            TaskEvent::Start,
            TaskEvent::Resume,
            TaskEvent::Retry,
            TaskEvent::Cancel,
        ] {
            assert!(!machine.can_transition(&event), "{event:?}");
        }
    }

    #[test]
    fn test_invalid_transition_leaves_state_unchanged() {
        let mut machine = TaskStateMachine::new(TaskStatus::Pending);
        let err = machine.transition(&TaskEvent::Pause).unwrap_err();
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: TaskStatus::Pending,
                event: "pause"
            }
        );
        assert_eq!(machine.current_state(), TaskStatus::Pending);
    }
}
