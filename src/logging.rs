//! # Structured Logging Module
//!
//! Environment-aware `tracing` setup plus structured helpers for task and item
//! operations. These are process logs; the per-task log stream users see is
//! persisted separately through the store.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::TelemetryConfig;
use crate::models::TaskId;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment defaults
pub fn init_structured_logging() {
    init_with_telemetry(&TelemetryConfig::default());
}

/// Initialize structured logging, honouring the telemetry section of the config.
///
/// `RUST_LOG` wins over `telemetry.log_level`, which wins over the environment default.
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_telemetry(telemetry: &TelemetryConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| telemetry.log_level.clone())
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let json = telemetry.json || environment == "production";

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(false)
                .json()
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(log_level.clone()))
                .boxed()
        };

        // A subscriber may already be installed by the host application
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            log_level = %log_level,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_environment() -> String {
    std::env::var("TASKFORGE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for task lifecycle operations
pub fn log_task_operation(
    operation: &str,
    task_id: Option<&TaskId>,
    task_type: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        task_id = task_id.map(|id| id.to_string()),
        task_type = task_type,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 TASK_OPERATION"
    );
}

/// Log structured data for a single work item inside a batch
pub fn log_item_operation(
    operation: &str,
    task_id: &TaskId,
    item_id: i64,
    attempt: u32,
    status: &str,
    details: Option<&str>,
) {
    tracing::debug!(
        operation = %operation,
        task_id = %task_id,
        item_id = item_id,
        attempt = attempt,
        status = %status,
        details = details,
        "🔧 ITEM_OPERATION"
    );
}

/// Log structured data for database operations
pub fn log_database_operation(
    operation: &str,
    table: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        table = table,
        status = %status,
        duration_ms = duration_ms,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "💾 DATABASE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("staging"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
        log_task_operation("task.created", None, Some("BATCH_EVALUATION"), "PENDING", None);
    }
}
