// Integration tests for logging functionality
// This binary installs the global subscriber, so it holds a single test.

use std::fs;

use flotilla::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl};
use tempfile::TempDir;
use tracing::{info, instrument, warn};

#[test]
fn test_file_log_is_json_lines() {
    temp_env::with_var_unset("RUST_LOG", file_log_is_json_lines);
}

fn file_log_is_json_lines() {
    let temp_dir = TempDir::new().unwrap();
    let log_dir = temp_dir.path().join("log");

    let config = LogConfig {
        level: "info".to_string(),
        format: LogFormat::Json,
        log_dir: Some(log_dir.clone()),
        enable_console: false,
    };
    let logger = LoggerImpl::init(&config).unwrap();

    info!("run started");
    info!(task_id = "1234abcd", worker = "w0", "task started");
    let result = judged_task(3);
    assert_eq!(result, 6);
    tracing::debug!("below the configured level");

    // Dropping the guard flushes the background writer.
    drop(logger);

    let log_files: Vec<_> = fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains("flotilla.log"))
        .collect();
    assert_eq!(log_files.len(), 1, "one daily file");

    let contents = fs::read_to_string(log_files[0].path()).unwrap();
    let lines: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line is json"))
        .collect();

    assert!(lines
        .iter()
        .any(|l| l["fields"]["message"] == "run started"));
    assert!(lines
        .iter()
        .any(|l| l["fields"]["task_id"] == "1234abcd" && l["fields"]["worker"] == "w0"));
    assert!(lines
        .iter()
        .any(|l| l["level"] == "WARN" && l["span"]["name"] == "judged_task"));
    assert!(!contents.contains("below the configured level"));
}

#[instrument]
fn judged_task(n: u32) -> u32 {
    warn!("task result does not match description");
    n * 2
}
