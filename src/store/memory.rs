//! In-memory task store for tests, development and single-process deployments
//! without a database.
//!
//! Each task and its log lines live in one `DashMap` entry, so every operation on a
//! task runs under that entry's shard lock and is atomic with respect to the others.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{StatusUpdate, TaskStore, RESULT_WRITABLE_STATES};
use crate::constants::status_groups::ACTIVE_STATES;
use crate::error::{Result, TaskforgeError};
use crate::models::{
    LogLevel, NewTask, Page, Task, TaskId, TaskLogEntry, TaskQuery, TaskResultData,
};
use crate::state_machine::TaskStatus;

#[derive(Debug)]
struct TaskEntry {
    task: Task,
    logs: Vec<TaskLogEntry>,
}

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    entries: DashMap<TaskId, TaskEntry>,
    next_task_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all tasks, newest first
    fn sorted_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .entries
            .iter()
            .map(|entry| entry.value().task.clone())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(&self, new_task: NewTask) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: self.next_task_id.fetch_add(1, Ordering::SeqCst) + 1,
            task_id: new_task.task_id,
            task_type: new_task.task_type,
            name: new_task.name,
            description: new_task.description,
            config: new_task.config,
            priority: new_task.priority,
            status: TaskStatus::Pending,
            processed_count: 0,
            total_count: 0,
            created_by: new_task.created_by,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            error_message: None,
            result_data: None,
        };

        match self.entries.entry(task.task_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TaskforgeError::Validation(
                format!("task {} already exists", task.task_id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(TaskEntry {
                    task: task.clone(),
                    logs: Vec::new(),
                });
                Ok(task)
            }
        }
    }

    async fn find_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.entries.get(task_id).map(|entry| entry.task.clone()))
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<Page<Task>> {
        let matching: Vec<Task> = self
            .sorted_tasks()
            .into_iter()
            .filter(|task| query.matches(task))
            .collect();
        Ok(Page::slice(matching, query.page, query.limit()))
    }

    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        Ok(self.sorted_tasks().into_iter().take(limit).collect())
    }

    async fn status_counts(&self) -> Result<Vec<(TaskStatus, u64)>> {
        let mut counts: Vec<(TaskStatus, u64)> = Vec::new();
        for entry in self.entries.iter() {
            let status = entry.task.status;
            match counts.iter_mut().find(|(s, _)| *s == status) {
                Some((_, count)) => *count += 1,
                None => counts.push((status, 1)),
            }
        }
        Ok(counts)
    }

    async fn task_ids_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskId>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| statuses.contains(&entry.task.status))
            .map(|entry| *entry.key())
            .collect())
    }

    async fn transition_status(
        &self,
        task_id: &TaskId,
        expected: &[TaskStatus],
        update: StatusUpdate,
    ) -> Result<Option<Task>> {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return Ok(None);
        };
        if !expected.contains(&entry.task.status) {
            return Ok(None);
        }
        update.apply_to(&mut entry.task);
        Ok(Some(entry.task.clone()))
    }

    async fn update_progress(
        &self,
        task_id: &TaskId,
        processed: i64,
        total: i64,
    ) -> Result<Option<Task>> {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return Ok(None);
        };
        let task = &mut entry.task;
        if !ACTIVE_STATES.contains(&task.status) {
            return Ok(None);
        }
        let total = total.max(0);
        task.total_count = total;
        task.processed_count = task.processed_count.max(processed).min(total);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn save_result(&self, task_id: &TaskId, result: &TaskResultData) -> Result<bool> {
        let Some(mut entry) = self.entries.get_mut(task_id) else {
            return Ok(false);
        };
        if !RESULT_WRITABLE_STATES.contains(&entry.task.status) {
            return Ok(false);
        }
        entry.task.result_data = Some(result.clone());
        entry.task.updated_at = Utc::now();
        Ok(true)
    }

    async fn append_log(
        &self,
        task_id: &TaskId,
        level: LogLevel,
        message: &str,
    ) -> Result<TaskLogEntry> {
        let mut entry = self
            .entries
            .get_mut(task_id)
            .ok_or_else(|| TaskforgeError::task_not_found(task_id))?;
        let log = TaskLogEntry {
            id: self.next_log_id.fetch_add(1, Ordering::SeqCst) + 1,
            task_id: *task_id,
            level,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        entry.logs.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<TaskLogEntry>> {
        Ok(self
            .entries
            .get(task_id)
            .map(|entry| entry.logs.clone())
            .unwrap_or_default())
    }

    async fn delete_task(&self, task_id: &TaskId, blocked: &[TaskStatus]) -> Result<bool> {
        Ok(self
            .entries
            .remove_if(task_id, |_, entry| !blocked.contains(&entry.task.status))
            .is_some())
    }
}
