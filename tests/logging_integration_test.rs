//! Integration tests for logging functionality
//!
//! The global subscriber can be installed once per process, so the
//! initialization checks live in a single test.

use periop_omop::config::LoggingConfig;
use periop_omop::logging::init_logging;
use tempfile::TempDir;

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(config.local_enabled);
    assert_eq!(config.local_rotation, "daily");
}

#[test]
fn test_init_logging_creates_directory_once() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs");

    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_path.to_string_lossy().to_string(),
        local_rotation: "never".to_string(),
    };

    assert!(init_logging("loud", &config).is_err());
    assert!(!log_path.exists());

    let guard = init_logging("debug", &config).unwrap();
    assert!(log_path.is_dir());
    tracing::info!(table = "measurement", "Logging smoke test");

    // a second subscriber cannot be installed
    assert!(init_logging("info", &config).is_err());
    drop(guard);
}
