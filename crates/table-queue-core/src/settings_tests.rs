//! Tests for settings loading.

use super::*;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn settings_file(extension: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write settings");
    file
}

#[test]
fn test_defaults() {
    let settings = QueueSettings::default();

    assert_eq!(settings.table_name, "queue");
    assert_eq!(settings.redelivery_time_seconds, 180);
    assert_eq!(settings.attempts_before_failure, 5);
    assert_eq!(settings.fetch_window_ms, 200);
    assert_eq!(settings.idle_sleep(), Duration::from_millis(200));
    assert!(settings.validate().is_ok());
}

#[test]
#[serial]
fn test_load_without_sources_uses_defaults() {
    let settings = QueueSettings::load(None).unwrap();
    assert_eq!(settings.table_name, "queue");
    assert_eq!(settings.attempts_before_failure, 5);
}

#[test]
#[serial]
fn test_load_explicit_toml_file() {
    let file = settings_file(
        ".toml",
        "table_name = \"jobs\"\nattempts_before_failure = 3\nredelivery_time_seconds = 100\n",
    );

    let settings = QueueSettings::load(Some(file.path())).unwrap();

    assert_eq!(settings.table_name, "jobs");
    assert_eq!(settings.attempts_before_failure, 3);
    assert_eq!(settings.redelivery_time_seconds, 100);
    assert_eq!(settings.fetch_window_ms, 200);
}

#[test]
#[serial]
fn test_load_explicit_yaml_file() {
    let file = settings_file(".yaml", "table_name: outbox\nfetch_window_ms: 50\n");

    let settings = QueueSettings::load(Some(file.path())).unwrap();

    assert_eq!(settings.table_name, "outbox");
    assert_eq!(settings.store_options().fetch_window, Duration::from_millis(50));
}

#[test]
fn test_missing_explicit_file_is_error() {
    let result = QueueSettings::load(Some(Path::new("/nonexistent/table-queue.toml")));
    assert!(matches!(result, Err(ConfigError::Loading { .. })));
}

#[test]
#[serial]
fn test_environment_overrides() {
    std::env::set_var("TQ__POLL_INTERVAL_MS", "25");

    let settings = QueueSettings::load(None).unwrap();

    std::env::remove_var("TQ__POLL_INTERVAL_MS");
    assert_eq!(settings.poll_interval_ms, 25);
}

#[test]
fn test_invalid_settings_rejected() {
    let file = settings_file(".toml", "table_name = \"drop table\"\n");
    assert!(matches!(
        QueueSettings::load(Some(file.path())),
        Err(ConfigError::Invalid { .. })
    ));

    let zero_attempts = QueueSettings {
        attempts_before_failure: 0,
        ..QueueSettings::default()
    };
    assert!(zero_attempts.validate().is_err());

    let zero_window = QueueSettings {
        fetch_window_ms: 0,
        ..QueueSettings::default()
    };
    assert!(zero_window.validate().is_err());
}

#[test]
fn test_store_options() {
    let options = QueueSettings::default().store_options();

    assert_eq!(options.table_name, "queue");
    assert_eq!(options.fetch_window, Duration::from_millis(200));
    assert_eq!(options.poll_interval, Duration::from_millis(10));
}
