//! Environment overrides live in their own test binary so the variables they set
//! cannot leak into other tests.

use std::fs;
use taskforge::config::ConfigManager;

#[test]
fn env_vars_override_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("taskforge.toml"),
        "[engine]\nmax_concurrent_items = 4\nmax_attempts = 5\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("staging.toml"),
        "[engine]\nmax_concurrent_items = 6\n",
    )
    .unwrap();

    std::env::set_var("TASKFORGE__ENGINE__MAX_ATTEMPTS", "2");
    let manager = ConfigManager::load_with_env(Some(dir.path().to_path_buf()), "staging").unwrap();
    std::env::remove_var("TASKFORGE__ENGINE__MAX_ATTEMPTS");

    let engine = &manager.config().engine;
    assert_eq!(engine.max_concurrent_items, 6);
    assert_eq!(engine.max_attempts, 2);
    assert_eq!(engine.progress_report_interval, 20);
    assert_eq!(manager.environment(), "staging");
}

#[test]
fn repository_config_files_are_valid() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    for environment in ["development", "test", "production"] {
        let manager = ConfigManager::load_with_env(Some(dir.clone()), environment).unwrap();
        assert!(manager.config().engine.max_concurrent_items >= 1, "{environment}");
    }

    let test = ConfigManager::load_with_env(Some(dir), "test").unwrap();
    assert_eq!(test.config().engine.retry_base_delay_ms, 10);
}
