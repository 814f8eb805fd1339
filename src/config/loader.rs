//! Configuration Loader
//!
//! Environment-aware loading: detects the environment, stacks the TOML files for it
//! over the compiled defaults, applies `TASKFORGE__*` overrides and validates.

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::TaskforgeConfig;
use crate::error::Result;

const BASE_FILE: &str = "taskforge.toml";
const ENV_PREFIX: &str = "TASKFORGE";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: TaskforgeConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_with_env(config_dir, &environment)
    }

    /// Load configuration from a directory with an explicit environment name.
    ///
    /// Missing files are skipped; the compiled defaults always apply.
    pub fn load_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Config::builder()
            .add_source(Config::try_from(&TaskforgeConfig::default())?)
            .add_source(File::from(config_directory.join(BASE_FILE)).required(false))
            .add_source(
                File::from(config_directory.join(format!("{environment}.toml"))).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<TaskforgeConfig>()?;

        config.validate()?;

        debug!(
            config = %Self::sanitize_config_for_logging(&config),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, e.g. in tests.
    pub fn from_config(config: TaskforgeConfig, environment: &str) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &TaskforgeConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with connection strings and secrets masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// `TASKFORGE_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        env::var("TASKFORGE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn sanitize_config_for_logging(config: &TaskforgeConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["password", "secret", "token", "credential", "url"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if !is_sensitive {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                        continue;
                    }

                    match val {
                        serde_json::Value::Null => {}
                        serde_json::Value::String(s) if s.is_empty() => {
                            *val = serde_json::Value::String("[EMPTY]".to_string());
                        }
                        serde_json::Value::String(s) => {
                            // Keep the first and last two characters for debugging
                            let chars: Vec<char> = s.chars().collect();
                            let masked = if chars.len() > 4 {
                                let head: String = chars[..2].iter().collect();
                                let tail: String = chars[chars.len() - 2..].iter().collect();
                                format!("{head}***{tail}")
                            } else {
                                "***".to_string()
                            };
                            *val = serde_json::Value::String(format!("[MASKED: {masked}]"));
                        }
                        _ => {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}
