//! Postgres-backed task store.
//!
//! Uses runtime-checked queries (`query_as` with `FromRow`) so the crate builds
//! without a live database. Status changes are single `UPDATE ... WHERE status = ANY`
//! statements; progress is clamped in SQL so concurrent writers cannot move it
//! backwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::time::Instant;
use uuid::Uuid;

use super::{FieldUpdate, StatusUpdate, TaskStore, RESULT_WRITABLE_STATES};
use crate::config::DatabaseConfig;
use crate::constants::status_groups::ACTIVE_STATES;
use crate::error::{Result, TaskforgeError};
use crate::logging::log_database_operation;
use crate::models::{
    CallerIdentity, LogLevel, NewTask, Page, Task, TaskConfig, TaskId, TaskLogEntry, TaskQuery,
    TaskResultData,
};
use crate::state_machine::TaskStatus;

use super::migrations::DatabaseMigrations;

const TASK_COLUMNS: &str = "id, task_id, task_type, name, description, config, priority, status, \
     processed_count, total_count, created_by, created_at, started_at, completed_at, updated_at, \
     error_message, result_data";

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    task_id: Uuid,
    task_type: String,
    name: String,
    description: Option<String>,
    config: Json<TaskConfig>,
    priority: String,
    status: String,
    processed_count: i64,
    total_count: i64,
    created_by: Option<Json<CallerIdentity>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    error_message: Option<String>,
    result_data: Option<Json<TaskResultData>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = TaskforgeError;

    fn try_from(row: TaskRow) -> Result<Self> {
        Ok(Task {
            id: row.id,
            task_id: TaskId(row.task_id),
            task_type: row.task_type,
            name: row.name,
            description: row.description,
            config: row.config.0,
            priority: row.priority.parse().map_err(TaskforgeError::Persistence)?,
            status: row.status.parse().map_err(TaskforgeError::Persistence)?,
            processed_count: row.processed_count,
            total_count: row.total_count,
            created_by: row.created_by.map(|json| json.0),
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            error_message: row.error_message,
            result_data: row.result_data.map(|json| json.0),
        })
    }
}

#[derive(Debug, FromRow)]
struct LogRow {
    id: i64,
    task_id: Uuid,
    level: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for TaskLogEntry {
    type Error = TaskforgeError;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(TaskLogEntry {
            id: row.id,
            task_id: TaskId(row.task_id),
            level: row.level.parse().map_err(TaskforgeError::Persistence)?,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

fn status_strings(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn to_task(row: Option<TaskRow>) -> Result<Option<Task>> {
    row.map(Task::try_from).transpose()
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the database section of the configuration and apply migrations.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            TaskforgeError::Configuration("database.url is not set".to_string())
        })?;

        let started = Instant::now();
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        let store = Self::new(pool);
        store.run_migrations().await?;

        log_database_operation(
            "connect",
            None,
            "ready",
            Some(started.elapsed().as_millis() as u64),
            Some("migrations applied"),
        );
        Ok(store)
    }

    pub async fn run_migrations(&self) -> Result<()> {
        DatabaseMigrations::run_all(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &TaskQuery) {
        builder.push(" WHERE TRUE");
        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(task_type) = &query.task_type {
            builder
                .push(" AND UPPER(task_type) = UPPER(")
                .push_bind(task_type.clone())
                .push(")");
        }
        if let Some(after) = query.created_after {
            builder.push(" AND created_at >= ").push_bind(after);
        }
        if let Some(before) = query.created_before {
            builder.push(" AND created_at < ").push_bind(before);
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn insert_task(&self, new_task: NewTask) -> Result<Task> {
        let sql = format!(
            "INSERT INTO taskforge_tasks (task_id, task_type, name, description, config, priority, \
             status, created_by) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(new_task.task_id.0)
            .bind(&new_task.task_type)
            .bind(&new_task.name)
            .bind(&new_task.description)
            .bind(Json(&new_task.config))
            .bind(new_task.priority.as_str())
            .bind(TaskStatus::Pending.as_str())
            .bind(new_task.created_by.as_ref().map(Json))
            .fetch_one(&self.pool)
            .await?;
        Task::try_from(row)
    }

    async fn find_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM taskforge_tasks WHERE task_id = $1");
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id.0)
            .fetch_optional(&self.pool)
            .await?;
        to_task(row)
    }

    async fn list_tasks(&self, query: &TaskQuery) -> Result<Page<Task>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM taskforge_tasks");
        Self::push_filters(&mut count, query);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TASK_COLUMNS} FROM taskforge_tasks"
        ));
        Self::push_filters(&mut select, query);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(query.limit() as i64)
            .push(" OFFSET ")
            .push_bind(query.offset() as i64);

        let rows = select
            .build_query_as::<TaskRow>()
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            page: query.page,
            size: query.limit(),
            total: total.max(0) as usize,
        })
    }

    async fn recent_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM taskforge_tasks ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Task::try_from)
            .collect()
    }

    async fn status_counts(&self) -> Result<Vec<(TaskStatus, u64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM taskforge_tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(status, count)| {
                let status: TaskStatus = status.parse().map_err(TaskforgeError::Persistence)?;
                Ok((status, count.max(0) as u64))
            })
            .collect()
    }

    async fn task_ids_with_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskId>> {
        let ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT task_id FROM taskforge_tasks WHERE status = ANY($1)")
                .bind(status_strings(statuses))
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(TaskId).collect())
    }

    async fn transition_status(
        &self,
        task_id: &TaskId,
        expected: &[TaskStatus],
        update: StatusUpdate,
    ) -> Result<Option<Task>> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE taskforge_tasks SET status = ");
        builder
            .push_bind(update.status.as_str())
            .push(", updated_at = NOW()");

        match update.started_at {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(at) => {
                builder.push(", started_at = ").push_bind(at);
            }
            FieldUpdate::Clear => {
                builder.push(", started_at = NULL");
            }
        }
        match update.completed_at {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(at) => {
                builder.push(", completed_at = ").push_bind(at);
            }
            FieldUpdate::Clear => {
                builder.push(", completed_at = NULL");
            }
        }
        match update.error_message {
            FieldUpdate::Keep => {}
            FieldUpdate::Set(message) => {
                builder.push(", error_message = ").push_bind(message);
            }
            FieldUpdate::Clear => {
                builder.push(", error_message = NULL");
            }
        }
        if update.reset_progress {
            builder.push(", processed_count = 0, result_data = NULL");
        }

        builder
            .push(" WHERE task_id = ")
            .push_bind(task_id.0)
            .push(" AND status = ANY(")
            .push_bind(status_strings(expected))
            .push(") RETURNING ")
            .push(TASK_COLUMNS);

        let row = builder
            .build_query_as::<TaskRow>()
            .fetch_optional(&self.pool)
            .await?;
        to_task(row)
    }

    async fn update_progress(
        &self,
        task_id: &TaskId,
        processed: i64,
        total: i64,
    ) -> Result<Option<Task>> {
        let sql = format!(
            "UPDATE taskforge_tasks SET total_count = $3, \
             processed_count = LEAST(GREATEST(processed_count, $2), $3), updated_at = NOW() \
             WHERE task_id = $1 AND status = ANY($4) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id.0)
            .bind(processed)
            .bind(total.max(0))
            .bind(status_strings(ACTIVE_STATES))
            .fetch_optional(&self.pool)
            .await?;
        to_task(row)
    }

    async fn save_result(&self, task_id: &TaskId, result: &TaskResultData) -> Result<bool> {
        let outcome = sqlx::query(
            "UPDATE taskforge_tasks SET result_data = $2, updated_at = NOW() \
             WHERE task_id = $1 AND status = ANY($3)",
        )
        .bind(task_id.0)
        .bind(Json(result))
        .bind(status_strings(RESULT_WRITABLE_STATES))
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }

    async fn append_log(
        &self,
        task_id: &TaskId,
        level: LogLevel,
        message: &str,
    ) -> Result<TaskLogEntry> {
        // The foreign key rejects logs for tasks that no longer exist
        let row = sqlx::query_as::<_, LogRow>(
            "INSERT INTO taskforge_task_logs (task_id, level, message) \
             SELECT task_id, $2, $3 FROM taskforge_tasks WHERE task_id = $1 \
             RETURNING id, task_id, level, message, created_at",
        )
        .bind(task_id.0)
        .bind(level.as_str())
        .bind(message)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| TaskforgeError::task_not_found(task_id))?;
        TaskLogEntry::try_from(row)
    }

    async fn list_logs(&self, task_id: &TaskId) -> Result<Vec<TaskLogEntry>> {
        sqlx::query_as::<_, LogRow>(
            "SELECT id, task_id, level, message, created_at FROM taskforge_task_logs \
             WHERE task_id = $1 ORDER BY created_at, id",
        )
        .bind(task_id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TaskLogEntry::try_from)
        .collect()
    }

    async fn delete_task(&self, task_id: &TaskId, blocked: &[TaskStatus]) -> Result<bool> {
        // Logs go with the task through ON DELETE CASCADE
        let outcome = sqlx::query(
            "DELETE FROM taskforge_tasks WHERE task_id = $1 AND NOT (status = ANY($2))",
        )
        .bind(task_id.0)
        .bind(status_strings(blocked))
        .execute(&self.pool)
        .await?;
        Ok(outcome.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskPriority;

    async fn store() -> Option<PgTaskStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url: Some(url),
            ..Default::default()
        };
        Some(PgTaskStore::connect(&config).await.unwrap())
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_round_trip_and_compare_and_set() {
        let Some(store) = store().await else {
            return;
        };

        let task = store
            .insert_task(NewTask {
                task_id: TaskId::new(),
                task_type: "BATCH_EVALUATION".to_string(),
                name: "pg".to_string(),
                description: None,
                config: TaskConfig::Unrecognized(serde_json::json!({"answerIds": [1]})),
                priority: TaskPriority::High,
                created_by: Some(CallerIdentity::new("tester")),
            })
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        let running = store
            .transition_status(
                &task.task_id,
                &[TaskStatus::Pending],
                StatusUpdate::to(TaskStatus::Running).started_now(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.status, TaskStatus::Running);

        let progressed = store
            .update_progress(&task.task_id, 4, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progressed.processed_count, 3);

        store
            .append_log(&task.task_id, LogLevel::Info, "hello")
            .await
            .unwrap();
        assert_eq!(store.list_logs(&task.task_id).await.unwrap().len(), 1);

        assert!(!store
            .delete_task(&task.task_id, &[TaskStatus::Running])
            .await
            .unwrap());
    }
}
