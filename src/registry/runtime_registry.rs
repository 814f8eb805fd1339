use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::CancelSignal;
use crate::models::TaskId;

/// Cancellable reference to one run of a task
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    pub run_id: Uuid,
    pub signal: CancelSignal,
    pub started_at: DateTime<Utc>,
}

impl RuntimeHandle {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            signal: CancelSignal::new(),
            started_at: Utc::now(),
        }
    }
}

impl Default for RuntimeHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Concurrent map of task id to the handle of its live run.
///
/// Injected where needed, never global. Entries are keyed by task and tagged with a
/// run id, so a finishing run can only remove its own entry, never a newer run's.
#[derive(Debug, Default)]
pub struct TaskRuntimeRegistry {
    handles: DashMap<TaskId, RuntimeHandle>,
    removed: Notify,
}

impl TaskRuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and get a lease that unregisters it when dropped.
    ///
    /// A previous handle for the same task is replaced; it keeps its signal, so a run
    /// that was already cancelled stays cancelled.
    pub fn register(self: &Arc<Self>, task_id: TaskId, handle: RuntimeHandle) -> RuntimeLease {
        if let Some(previous) = self.handles.insert(task_id, handle.clone()) {
            debug!(
                task_id = %task_id,
                previous_run = %previous.run_id,
                run_id = %handle.run_id,
                "Replacing runtime handle"
            );
        }
        RuntimeLease {
            registry: Arc::clone(self),
            task_id,
            handle,
        }
    }

    /// Ask the live run of a task to stop admitting work.
    ///
    /// Returns false when the task has no live run in this process.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.handles.get(task_id) {
            Some(handle) => {
                handle.signal.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, task_id: &TaskId) -> bool {
        self.handles.contains_key(task_id)
    }

    /// True while `run_id` is the registered run of the task
    pub fn is_current(&self, task_id: &TaskId, run_id: Uuid) -> bool {
        self.handles
            .get(task_id)
            .is_some_and(|handle| handle.run_id == run_id)
    }

    pub fn running_count(&self) -> usize {
        self.handles.len()
    }

    pub fn running_task_ids(&self) -> Vec<TaskId> {
        self.handles.iter().map(|entry| *entry.key()).collect()
    }

    /// Remove the entry for `task_id` only if it belongs to `run_id`.
    pub fn remove(&self, task_id: &TaskId, run_id: Uuid) -> bool {
        let removed = self
            .handles
            .remove_if(task_id, |_, handle| handle.run_id == run_id)
            .is_some();
        if removed {
            self.removed.notify_waiters();
        }
        removed
    }

    /// Cancel every live run. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        self.handles
            .iter()
            .filter(|entry| entry.signal.cancel())
            .count()
    }

    /// Wait until no runs are registered, up to `timeout`. Returns whether it drained.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let notified = self.removed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.handles.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Registration of a live run. Dropping it removes the run from the registry.
#[derive(Debug)]
pub struct RuntimeLease {
    registry: Arc<TaskRuntimeRegistry>,
    task_id: TaskId,
    handle: RuntimeHandle,
}

impl RuntimeLease {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn run_id(&self) -> Uuid {
        self.handle.run_id
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.handle.signal
    }

    pub fn registry(&self) -> &Arc<TaskRuntimeRegistry> {
        &self.registry
    }
}

impl Drop for RuntimeLease {
    fn drop(&mut self) {
        self.registry.remove(&self.task_id, self.handle.run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_drop_removes_entry() {
        let registry = Arc::new(TaskRuntimeRegistry::new());
        let task_id = TaskId::new();

        let lease = registry.register(task_id, RuntimeHandle::new());
        assert!(registry.is_running(&task_id));
        assert_eq!(registry.running_count(), 1);

        drop(lease);
        assert!(!registry.is_running(&task_id));
        assert!(!registry.cancel(&task_id));
    }

    #[test]
    fn test_old_run_cannot_evict_new_run() {
        let registry = Arc::new(TaskRuntimeRegistry::new());
        let task_id = TaskId::new();

        let old = registry.register(task_id, RuntimeHandle::new());
        let new = registry.register(task_id, RuntimeHandle::new());
        assert!(!registry.is_current(&task_id, old.run_id()));

        drop(old);
        assert!(registry.is_current(&task_id, new.run_id()));
    }

    #[test]
    fn test_cancel_reaches_the_run() {
        let registry = Arc::new(TaskRuntimeRegistry::new());
        let task_id = TaskId::new();
        let lease = registry.register(task_id, RuntimeHandle::new());

        assert!(registry.cancel(&task_id));
        assert!(lease.signal().is_cancelled());
    }

    #[tokio::test]
    async fn test_concurrent_register_and_cancel() {
        let registry = Arc::new(TaskRuntimeRegistry::new());
        let mut joins = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            joins.push(tokio::spawn(async move {
                let task_id = TaskId::new();
                let lease = registry.register(task_id, RuntimeHandle::new());
                tokio::task::yield_now().await;
                assert!(registry.cancel(&task_id));
                drop(lease);
            }));
        }
        for join in joins {
            join.await.unwrap();
        }
        assert_eq!(registry.running_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_empty() {
        let registry = Arc::new(TaskRuntimeRegistry::new());
        let lease = registry.register(TaskId::new(), RuntimeHandle::new());

        assert!(!registry.wait_until_empty(Duration::from_millis(20)).await);

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_empty(Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(lease);
        assert!(waiter.await.unwrap());
    }
}
