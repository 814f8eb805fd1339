//! # Engine Configuration
//!
//! Layered configuration built with the `config` crate. Sources are applied in order,
//! later ones winning:
//!
//! 1. compiled defaults ([`TaskforgeConfig::default`])
//! 2. `config/taskforge.toml`
//! 3. `config/<environment>.toml`
//! 4. `TASKFORGE__<SECTION>__<KEY>` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskforge::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let cap = manager.config().engine.max_concurrent_items;
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::defaults;
use crate::error::{Result, TaskforgeError};

pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskforgeConfig {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub events: EventsConfig,
    pub telemetry: TelemetryConfig,
}

/// Dispatch and batch execution tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Admission gate size per batch
    pub max_concurrent_items: usize,
    /// Attempts per item, first attempt included
    pub max_attempts: u32,
    /// Retry `n` of an item waits `n * retry_base_delay_ms`
    pub retry_base_delay_ms: u64,
    /// Persist progress every N item completions (and always after the last)
    pub progress_report_interval: usize,
    pub dispatch_channel_capacity: usize,
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_items: defaults::MAX_CONCURRENT_ITEMS,
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            progress_report_interval: defaults::PROGRESS_REPORT_INTERVAL,
            dispatch_channel_capacity: defaults::DISPATCH_CHANNEL_CAPACITY,
            shutdown_timeout_ms: defaults::SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Postgres settings. Without a `url` the engine runs on the in-memory store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer; slow subscribers past this lag lose messages
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Overrides the environment's default filter when `RUST_LOG` is unset
    pub log_level: Option<String>,
    /// Force JSON output regardless of environment
    pub json: bool,
}

impl TaskforgeConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (
                "engine.max_concurrent_items",
                self.engine.max_concurrent_items as u64,
            ),
            ("engine.max_attempts", u64::from(self.engine.max_attempts)),
            (
                "engine.progress_report_interval",
                self.engine.progress_report_interval as u64,
            ),
            (
                "engine.dispatch_channel_capacity",
                self.engine.dispatch_channel_capacity as u64,
            ),
            ("events.channel_capacity", self.events.channel_capacity as u64),
            (
                "database.max_connections",
                u64::from(self.database.max_connections),
            ),
        ];

        for (field, value) in positive {
            if value == 0 {
                return Err(TaskforgeError::Configuration(format!(
                    "{field} must be greater than 0"
                )));
            }
        }

        if let Some(url) = &self.database.url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(TaskforgeError::Configuration(
                    "database.url must be a postgres:// connection string".to_string(),
                ));
            }
        }

        Ok(())
    }
}
