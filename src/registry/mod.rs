//! # Runtime Registry
//!
//! In-process bookkeeping for task runs that are executing right now.
//!
//! ```text
//! TaskRuntimeRegistry
//! ├── TaskId -> RuntimeHandle   (one live run per task)
//! └── RuntimeHandle
//!     ├── run_id                (generation of the run)
//!     └── CancelSignal          (cooperative stop flag)
//! ```
//!
//! The registry is not authoritative: the store owns task status. A handle only
//! exists while the process that started the run is alive, and it is removed when
//! the run's [`RuntimeLease`] is dropped.

pub mod cancel_signal;
pub mod runtime_registry;

pub use cancel_signal::CancelSignal;
pub use runtime_registry::{RuntimeHandle, RuntimeLease, TaskRuntimeRegistry};
