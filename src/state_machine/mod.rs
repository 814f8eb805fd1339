// Task lifecycle state machine.
//
// The transition table is pure: it decides legality from the current status and
// the requested event. Persisting the outcome is the store's job, done with a
// compare-and-set on the status the decision was made from.

pub mod errors;
pub mod events;
pub mod states;
pub mod task_state_machine;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEvent;
pub use states::TaskStatus;
pub use task_state_machine::{determine_target_state, TaskStateMachine};
