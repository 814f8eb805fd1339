//! # Task Model
//!
//! A task is one unit of background work with a persisted lifecycle status and
//! progress. `task_id` is the externally addressable identifier and stays the same
//! across retries; `id` is the store's internal sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::results::{BatchSummary, TaskResultData};
use super::task_config::TaskConfig;
use crate::state_machine::TaskStatus;

/// Externally addressable task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Closed set of task kinds the engine knows how to execute.
///
/// A task's `type` is persisted as the raw string the client sent; it is parsed into
/// a `TaskKind` when the task is created and again when it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Evaluate the answers selected by the configured scope
    BatchEvaluation,
    /// Same as `BatchEvaluation`, but already evaluated answers are always included
    BatchReevaluation,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [Self::BatchEvaluation, Self::BatchReevaluation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchEvaluation => "BATCH_EVALUATION",
            Self::BatchReevaluation => "BATCH_REEVALUATION",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("{}: {s}", crate::constants::UNSUPPORTED_TASK_TYPE))
    }
}

/// Advisory priority. Stored and reported, never used for scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            _ => Err(format!("Invalid task priority: {s}")),
        }
    }
}

/// Identity of whoever created the task.
///
/// Captured once at creation and handed explicitly to every item-level call, so
/// quota and accounting in the evaluation collaborator never depend on which
/// worker happens to run the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl CallerIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Identity used for tasks created without a caller.
    pub fn system() -> Self {
        Self::new("system")
    }
}

/// Persisted task record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_id: TaskId,
    pub task_type: String,
    pub name: String,
    pub description: Option<String>,
    pub config: TaskConfig,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub processed_count: i64,
    pub total_count: i64,
    pub created_by: Option<CallerIdentity>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
    pub result_data: Option<TaskResultData>,
}

impl Task {
    pub fn kind(&self) -> Option<TaskKind> {
        self.task_type.parse().ok()
    }

    /// Progress as a whole percentage. Zero until the total is known.
    pub fn progress_percent(&self) -> u8 {
        progress_percent(self.processed_count, self.total_count)
    }

    pub fn caller(&self) -> CallerIdentity {
        self.created_by.clone().unwrap_or_else(CallerIdentity::system)
    }

    pub fn result_summary(&self) -> Option<&BatchSummary> {
        self.result_data.as_ref().map(|data| &data.summary)
    }

    pub fn to_view(&self) -> TaskView {
        TaskView {
            task_id: self.task_id,
            task_type: self.task_type.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            status: self.status,
            progress: self.progress_percent(),
            processed_count: self.processed_count,
            total_count: self.total_count,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            error_message: self.error_message.clone(),
            result_summary: self.result_summary().cloned(),
        }
    }
}

pub(crate) fn progress_percent(processed: i64, total: i64) -> u8 {
    if total <= 0 {
        return 0;
    }
    let clamped = processed.clamp(0, total);
    ((clamped * 100) / total) as u8
}

/// Fields the store needs to insert a task; everything else is generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_id: TaskId,
    pub task_type: String,
    pub name: String,
    pub description: Option<String>,
    pub config: TaskConfig,
    pub priority: TaskPriority,
    pub created_by: Option<CallerIdentity>,
}

/// Task creation request as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub auto_start: Option<bool>,
}

impl CreateTaskRequest {
    pub fn new(task_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            config: Some(config),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = Some(auto_start);
        self
    }

    /// Defaults to true when the client leaves it out.
    pub fn should_auto_start(&self) -> bool {
        self.auto_start.unwrap_or(true)
    }
}

/// Task view returned from create and query operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub name: String,
    pub description: Option<String>,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: u8,
    pub processed_count: i64,
    pub total_count: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<BatchSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(5, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(5, 5), 100);
        assert_eq!(progress_percent(7, 5), 100);
    }

    #[test]
    fn test_task_kind_parsing() {
        assert_eq!(
            "batch_evaluation".parse::<TaskKind>().unwrap(),
            TaskKind::BatchEvaluation
        );
        let err = "UNKNOWN_KIND".parse::<TaskKind>().unwrap_err();
        assert!(err.contains("unsupported task type"));
    }

    #[test]
    fn test_create_request_wire_format() {
        let request: CreateTaskRequest = serde_json::from_value(serde_json::json!({
            "type": "BATCH_EVALUATION",
            "config": {"answerIds": [1, 2]},
            "priority": "HIGH"
        }))
        .unwrap();

        assert_eq!(request.task_type, "BATCH_EVALUATION");
        assert_eq!(request.priority, Some(TaskPriority::High));
        assert!(request.should_auto_start());
    }

    #[test]
    fn test_task_id_round_trips_through_display() {
        let id = TaskId::new();
        assert_eq!(id.to_string().parse::<TaskId>().unwrap(), id);
    }
}
