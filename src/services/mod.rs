//! Services exposed to API layers.

pub mod task_lifecycle;

pub use task_lifecycle::{ExportFormat, TaskLifecycleService};
