//! # Task Lifecycle Service
//!
//! The public face of the engine: create, pause, resume, cancel, retry and delete
//! tasks, plus read-only projections and a couple of bulk administrative actions.
//!
//! Every status change is a compare-and-set against the statuses the transition
//! table allows the event from, so a concurrent change never gets silently
//! overwritten. A rejected transition is reported as [`TaskforgeError::IllegalState`]
//! and leaves the task untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::constants::{defaults, events, status_groups::TERMINAL_STATES};
use crate::error::{Result, TaskforgeError};
use crate::events::EventPublisher;
use crate::execution::{DispatchQueue, DispatchRequest};
use crate::logging::log_task_operation;
use crate::models::{
    CallerIdentity, CreateTaskRequest, ItemRecord, LogLevel, NewTask, Page, Task, TaskConfig,
    TaskId, TaskKind, TaskLogEntry, TaskQuery, TaskResultData, TaskStatistics, TaskView,
};
use crate::registry::TaskRuntimeRegistry;
use crate::state_machine::{determine_target_state, TaskEvent, TaskStatus};
use crate::store::{StatusUpdate, TaskStore};
use crate::validation::validate_create_request;

/// Serialization of `export_task_results`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One pretty-printed document
    #[default]
    Json,
    /// Task line first, then one line per item record
    Ndjson,
}

impl FromStr for ExportFormat {
    type Err = TaskforgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            other => Err(TaskforgeError::Validation(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskExport<'a> {
    task: TaskView,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<&'a TaskResultData>,
    exported_at: DateTime<Utc>,
}

/// Statuses `event` may legally be applied from
fn sources_for(event: &TaskEvent) -> Vec<TaskStatus> {
    TaskStatus::ALL
        .into_iter()
        .filter(|status| determine_target_state(*status, event).is_ok())
        .collect()
}

#[derive(Clone)]
pub struct TaskLifecycleService {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRuntimeRegistry>,
    events: EventPublisher,
    dispatch: DispatchQueue,
}

impl std::fmt::Debug for TaskLifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskLifecycleService")
            .field("running", &self.registry.running_count())
            .finish()
    }
}

impl TaskLifecycleService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRuntimeRegistry>,
        events: EventPublisher,
        dispatch: DispatchQueue,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            dispatch,
        }
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    /// Validate and persist a PENDING task, then queue it for dispatch if `autoStart`.
    ///
    /// Config for a known kind is parsed into its typed form here, so a malformed
    /// config is rejected before anything is stored. An unknown `type` is accepted and
    /// fails at dispatch.
    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
        caller: Option<CallerIdentity>,
    ) -> Result<TaskView> {
        let raw_config = validate_create_request(&request)?;
        let kind = request.task_type.parse::<TaskKind>().ok();
        let config = TaskConfig::parse(kind, raw_config)?;
        let task_type = kind.map_or_else(
            || request.task_type.trim().to_string(),
            |kind| kind.as_str().to_string(),
        );

        let task = self
            .store
            .insert_task(NewTask {
                task_id: TaskId::new(),
                name: request
                    .name
                    .clone()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or_else(|| task_type.clone()),
                task_type,
                description: request.description.clone(),
                config,
                priority: request.priority.unwrap_or_default(),
                created_by: caller,
            })
            .await?;

        self.store
            .append_log(&task.task_id, LogLevel::Info, "Task created")
            .await?;
        log_task_operation(
            events::TASK_CREATED,
            Some(&task.task_id),
            Some(&task.task_type),
            task.status.as_str(),
            None,
        );
        self.events.publish_task(&task);

        if request.should_auto_start() {
            self.dispatch
                .submit(DispatchRequest::created(task.task_id))
                .await?;
        }

        Ok(task.to_view())
    }

    /// Queue a PENDING task created with `autoStart = false`.
    pub async fn start_task(&self, task_id: &TaskId) -> Result<TaskView> {
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(TaskforgeError::IllegalState {
                task_id: task_id.to_string(),
                from: task.status,
                action: "start",
            });
        }
        self.dispatch.submit(DispatchRequest::created(*task_id)).await?;
        Ok(task.to_view())
    }

    /// Soft pause: flips the status only. The live run keeps going and may still
    /// finish the task.
    pub async fn pause_task(&self, task_id: &TaskId) -> Result<TaskView> {
        let task = self
            .apply(
                task_id,
                &TaskEvent::Pause,
                StatusUpdate::to(TaskStatus::Paused),
                "pause",
            )
            .await?;

        self.record(&task, events::TASK_PAUSED, "Task paused").await?;
        Ok(task.to_view())
    }

    /// Back to RUNNING. A new run is started only when no run of the task is live.
    pub async fn resume_task(&self, task_id: &TaskId) -> Result<TaskView> {
        let task = self
            .apply(
                task_id,
                &TaskEvent::Resume,
                StatusUpdate::to(TaskStatus::Running),
                "resume",
            )
            .await?;

        self.record(&task, events::TASK_RESUMED, "Task resumed").await?;
        if self.registry.is_running(task_id) {
            debug!(task_id = %task_id, "Run still live, resume is a status change only");
        } else {
            self.dispatch.submit(DispatchRequest::resumed(*task_id)).await?;
        }
        Ok(task.to_view())
    }

    /// Cancel from any non-terminal status and signal the live run, if any, to stop
    /// admitting work.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<TaskView> {
        let task = self
            .apply(
                task_id,
                &TaskEvent::Cancel,
                StatusUpdate::to(TaskStatus::Cancelled).completed_now(),
                "cancel",
            )
            .await?;

        let interrupted = self.registry.cancel(task_id);
        debug!(task_id = %task_id, interrupted, "Cancellation signalled");
        self.record(&task, events::TASK_CANCELLED, "Task cancelled").await?;
        Ok(task.to_view())
    }

    /// Start a new run of a FAILED or CANCELLED task from scratch.
    ///
    /// Rejected while a cancelled run is still draining its admitted items, so two
    /// runs of one task never evaluate side by side.
    pub async fn retry_task(&self, task_id: &TaskId) -> Result<TaskView> {
        if self.registry.is_running(task_id) {
            let task = self.store.get_task(task_id).await?;
            debug!(task_id = %task_id, "Retry rejected, previous run still live");
            return Err(TaskforgeError::IllegalState {
                task_id: task_id.to_string(),
                from: task.status,
                action: "retry",
            });
        }

        let update = StatusUpdate::to(TaskStatus::Running)
            .started_now()
            .clear_completed()
            .clear_error()
            .reset_progress();
        let task = self.apply(task_id, &TaskEvent::Retry, update, "retry").await?;

        self.record(&task, events::TASK_RETRY_REQUESTED, "Retry requested")
            .await?;
        self.dispatch.submit(DispatchRequest::retried(*task_id)).await?;
        Ok(task.to_view())
    }

    /// Remove a task and its logs. Not allowed while RUNNING.
    pub async fn delete_task(&self, task_id: &TaskId) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        if task.status == TaskStatus::Running {
            return Err(TaskforgeError::IllegalState {
                task_id: task_id.to_string(),
                from: task.status,
                action: "delete",
            });
        }

        if !self.store.delete_task(task_id, &[TaskStatus::Running]).await? {
            // Lost a race with a status change or another delete
            return match self.store.find_task(task_id).await? {
                Some(current) => Err(TaskforgeError::IllegalState {
                    task_id: task_id.to_string(),
                    from: current.status,
                    action: "delete",
                }),
                None => Err(TaskforgeError::task_not_found(task_id)),
            };
        }

        // A paused task may still have a live run
        self.registry.cancel(task_id);
        log_task_operation(
            events::TASK_DELETED,
            Some(task_id),
            Some(&task.task_type),
            task.status.as_str(),
            None,
        );
        Ok(())
    }

    pub async fn get_task_by_id(&self, task_id: &TaskId) -> Result<TaskView> {
        Ok(self.store.get_task(task_id).await?.to_view())
    }

    pub async fn get_task_logs(&self, task_id: &TaskId) -> Result<Vec<TaskLogEntry>> {
        self.store.get_task(task_id).await?;
        self.store.list_logs(task_id).await
    }

    /// Page through the per-item records of the last saved result.
    pub async fn get_task_results(
        &self,
        task_id: &TaskId,
        page: usize,
        size: usize,
    ) -> Result<Page<ItemRecord>> {
        let task = self.store.get_task(task_id).await?;
        let items = task.result_data.map(|data| data.items).unwrap_or_default();
        Ok(Page::slice(items, page, size))
    }

    pub async fn get_task_statistics(&self) -> Result<TaskStatistics> {
        Ok(TaskStatistics::from_counts(self.store.status_counts().await?))
    }

    pub async fn get_recent_tasks(&self, limit: Option<usize>) -> Result<Vec<TaskView>> {
        let limit = limit
            .unwrap_or(defaults::RECENT_TASKS_LIMIT)
            .clamp(1, defaults::MAX_PAGE_SIZE);
        let tasks = self.store.recent_tasks(limit).await?;
        Ok(tasks.iter().map(Task::to_view).collect())
    }

    pub async fn get_tasks(&self, query: &TaskQuery) -> Result<Page<TaskView>> {
        Ok(self.store.list_tasks(query).await?.map(|task| task.to_view()))
    }

    /// Delete every task in a terminal status. Returns how many were removed.
    pub async fn clear_completed_tasks(&self) -> Result<usize> {
        let blocked: Vec<TaskStatus> = TaskStatus::ALL
            .into_iter()
            .filter(|status| !status.is_terminal())
            .collect();

        let mut removed = 0;
        for task_id in self.store.task_ids_with_status(TERMINAL_STATES).await? {
            // A cancelled run may still be draining its admitted items
            if self.registry.is_running(&task_id) {
                continue;
            }
            if self.store.delete_task(&task_id, &blocked).await? {
                removed += 1;
            }
        }

        info!(removed, "Cleared finished tasks");
        Ok(removed)
    }

    /// Pause every RUNNING task. Tasks that changed status concurrently are skipped.
    pub async fn pause_all_running_tasks(&self) -> Result<usize> {
        let mut paused = 0;
        for task_id in self
            .store
            .task_ids_with_status(&[TaskStatus::Running])
            .await?
        {
            match self.pause_task(&task_id).await {
                Ok(_) => paused += 1,
                Err(err) if err.is_validation() || err.is_not_found() => {
                    debug!(task_id = %task_id, error = %err, "Skipped during bulk pause");
                }
                Err(err) => return Err(err),
            }
        }

        info!(paused, "Paused running tasks");
        Ok(paused)
    }

    /// Snapshot of status, progress and results, serialized as `format`.
    pub async fn export_task_results(
        &self,
        task_id: &TaskId,
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        let task = self.store.get_task(task_id).await?;
        let export = TaskExport {
            task: task.to_view(),
            results: task.result_data.as_ref(),
            exported_at: Utc::now(),
        };

        match format {
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(&export)?),
            ExportFormat::Ndjson => {
                let mut out = serde_json::to_vec(&TaskExport {
                    results: None,
                    ..export
                })?;
                out.push(b'\n');
                for item in task.result_data.iter().flat_map(|data| &data.items) {
                    serde_json::to_writer(&mut out, item)?;
                    out.push(b'\n');
                }
                Ok(out)
            }
        }
    }

    /// Compare-and-set the task from any status `event` is legal in.
    async fn apply(
        &self,
        task_id: &TaskId,
        event: &TaskEvent,
        update: StatusUpdate,
        action: &'static str,
    ) -> Result<Task> {
        let sources = sources_for(event);
        if let Some(task) = self
            .store
            .transition_status(task_id, &sources, update)
            .await?
        {
            return Ok(task);
        }

        match self.store.find_task(task_id).await? {
            Some(task) => Err(TaskforgeError::IllegalState {
                task_id: task_id.to_string(),
                from: task.status,
                action,
            }),
            None => Err(TaskforgeError::task_not_found(task_id)),
        }
    }

    async fn record(&self, task: &Task, operation: &str, message: &str) -> Result<()> {
        self.store
            .append_log(&task.task_id, LogLevel::Info, message)
            .await?;
        log_task_operation(
            operation,
            Some(&task.task_id),
            Some(&task.task_type),
            task.status.as_str(),
            None,
        );
        self.events.publish_task(task);
        Ok(())
    }
}
