//! Config files as an operator would write them.

use std::time::Duration;

use coursegen::config::{load_config, LogFormat};
use coursegen::{ConfigError, JobType};
use tempfile::TempDir;

fn write_config(dir: &TempDir, json: &str) -> std::path::PathBuf {
    let path = dir.path().join("coursegen.json");
    std::fs::write(&path, json).unwrap();
    path
}

#[test]
fn worker_settings_come_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "version": "1.0",
            "database_path": "data/coursegen.db",
            "worker_count": 4,
            "poll_interval_ms": 100,
            "stuck_threshold_minutes": 45,
            "approval_gates": [3, 5],
            "retry": {
                "default": { "max_retries": 3, "base_delay_ms": 1000, "max_delay_ms": 4000 }
            },
            "logging": { "level": "coursegen=debug", "format": "json" },
            "generator": { "command": "llm" }
        }"#,
    );

    let config = load_config(&path).unwrap();
    assert_eq!(
        config.database_path(),
        Some(std::path::PathBuf::from("data/coursegen.db"))
    );
    assert_eq!(config.logging.format, LogFormat::Json);

    let pool = config.pool_config();
    assert_eq!(pool.worker_count, 4);
    assert_eq!(pool.poll_interval, Duration::from_millis(100));
    let analyze = pool.retry.policy_for(JobType::Analyze);
    assert_eq!(analyze.max_retries, 3);
    assert_eq!(analyze.delay_for(1), Duration::from_millis(1000));
    assert_eq!(analyze.delay_for(2), Duration::from_millis(2000));
    assert_eq!(analyze.delay_for(5), Duration::from_millis(4000));
    assert_eq!(pool.retry.policy_for(JobType::Test).max_retries, 0);

    let settings = config.orchestrator_settings();
    assert_eq!(settings.approval_gates.iter().copied().collect::<Vec<_>>(), vec![3, 5]);
    assert_eq!(settings.stuck_threshold.num_minutes(), 45);
}

#[test]
fn schema_errors_are_collected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{ "version": "1.0", "worker_count": 0, "approval_gates": [0], "logging": { "format": "xml" } }"#,
    );

    match load_config(&path) {
        Err(ConfigError::SchemaValidation { errors }) => {
            assert!(errors.split("; ").count() >= 3, "{}", errors);
        }
        other => panic!("expected schema errors, got {:?}", other.map(|c| c.version)),
    }
}

#[test]
fn unknown_retry_job_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{ "version": "1.0", "retry": { "overrides": { "SEND_EMAIL": { "max_retries": 1, "base_delay_ms": 1, "max_delay_ms": 2 } } } }"#,
    );
    assert!(matches!(
        load_config(&path),
        Err(ConfigError::SchemaValidation { .. })
    ));
}
