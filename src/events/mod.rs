//! Status broadcast for subscribers (UI push, audit taps).
//!
//! Every status or progress change persisted through the engine is followed by one
//! [`TaskStatusMessage`]. Delivery is best effort: no subscribers is not an error and
//! lagging subscribers drop the oldest messages.

pub mod publisher;

pub use publisher::{EventPublisher, EventPublisherStats, TaskStatusMessage};
