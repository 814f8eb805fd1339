//! # Status Publisher
//!
//! Fan-out of [`TaskStatusMessage`]s over a tokio broadcast channel.
//!
//! ```rust
//! use chrono::Utc;
//! use taskforge::events::{EventPublisher, TaskStatusMessage};
//! use taskforge::models::TaskId;
//! use taskforge::TaskStatus;
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new(16);
//! let mut receiver = publisher.subscribe();
//!
//! publisher.publish(TaskStatusMessage {
//!     task_id: TaskId::new(),
//!     status: TaskStatus::Running,
//!     progress: 40,
//!     task_type: "BATCH_EVALUATION".to_string(),
//!     result_summary: None,
//!     published_at: Utc::now(),
//! });
//!
//! let message = receiver.recv().await.unwrap();
//! assert_eq!(message.progress, 40);
//! # });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::constants::defaults::EVENT_CHANNEL_CAPACITY;
use crate::models::{BatchSummary, Task, TaskId};
use crate::state_machine::TaskStatus;

/// Message pushed to subscribers on every status/progress change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusMessage {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(rename = "type")]
    pub task_type: String,
    pub result_summary: Option<BatchSummary>,
    pub published_at: DateTime<Utc>,
}

impl TaskStatusMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            status: task.status,
            progress: task.progress_percent(),
            task_type: task.task_type.clone(),
            result_summary: task.result_summary().cloned(),
            published_at: Utc::now(),
        }
    }
}

/// Broadcast publisher for task status messages
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TaskStatusMessage>,
    published: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventPublisherStats {
    pub published: u64,
    pub subscribers: usize,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn publish(&self, message: TaskStatusMessage) {
        self.published.fetch_add(1, Ordering::Relaxed);
        // Err only means nobody is listening right now
        if self.sender.send(message).is_err() {
            tracing::trace!("No status subscribers");
        }
    }

    pub fn publish_task(&self, task: &Task) {
        self.publish(TaskStatusMessage::from_task(task));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskStatusMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.published.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
