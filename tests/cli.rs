//! Command-line behavior of the `dfsfleet` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dfsfleet() -> Command {
    Command::cargo_bin("dfsfleet").unwrap()
}

#[test]
fn test_validate_prints_effective_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dfsfleet.toml");
    std::fs::write(
        &path,
        r#"
[dispatch]
replicas = ["10.0.0.1:50051", "10.0.0.2:50051"]

[generator]
requests_per_second = 4.0
duration_secs = 10
min_duration_secs = 60
"#,
    )
    .unwrap();

    dfsfleet()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("10.0.0.1:50051, 10.0.0.2:50051"))
        .stdout(predicate::str::contains("Duration: 60s"));
}

#[test]
fn test_validate_rejects_empty_replica_list() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dfsfleet.toml");
    std::fs::write(&path, "[dispatch]\nreplicas = []\n").unwrap();

    dfsfleet()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("replicas"));
}

#[test]
fn test_init_writes_config_once() {
    let dir = TempDir::new().unwrap();

    dfsfleet()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created dfsfleet.toml"));

    let written = std::fs::read_to_string(dir.path().join("dfsfleet.toml")).unwrap();
    let config = dfsfleet::config::load_config_str(&written).unwrap();
    assert!(config.validate().is_ok());

    dfsfleet()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_call_against_unreachable_replicas_reports_failure() {
    let dir = TempDir::new().unwrap();
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    dfsfleet()
        .current_dir(dir.path())
        .args(["call", "--replicas"])
        .arg(format!("{},{}", closed, closed))
        .args(["--per-call-timeout", "1", "--request-id", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"FAILED\""))
        .stdout(predicate::str::contains("\"target\": \"ALL_REPLICAS\""))
        .stdout(predicate::str::contains("\"request_id\": 3"));
}

fn closed_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn csv_rows(path: &std::path::Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap();
    let mut lines = content.lines().map(str::to_string);
    assert!(lines.next().unwrap().starts_with("request_id,"));
    lines.collect()
}

#[test]
fn test_stream_survives_total_outage() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("events.csv");
    let closed = closed_port();

    dfsfleet()
        .current_dir(dir.path())
        .args(["stream", "--replicas"])
        .arg(format!("{},{}", closed, closed))
        .args(["--duration", "1", "--rate", "5", "--per-call-timeout", "1"])
        .arg("--no-progress")
        .arg("--log-file")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Stream Results:"))
        .stdout(predicate::str::contains("Total:       5"))
        .stdout(predicate::str::contains("Failed:      5"))
        .stdout(predicate::str::contains("Actual rate:"));

    let rows = csv_rows(&log);
    assert_eq!(rows.len(), 5);
    for row in &rows {
        let fields: Vec<&str> = row.split(',').collect();
        assert_eq!(fields[3], "ALL_REPLICAS");
        assert_eq!(fields[5], "FAILED");
    }
}

#[test]
fn test_stream_applies_minimum_duration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dfsfleet.toml");
    let log = dir.path().join("events.csv");
    std::fs::write(&path, "[generator]\nmin_duration_secs = 2\n").unwrap();
    let closed = closed_port();

    dfsfleet()
        .arg("--config")
        .arg(&path)
        .args(["stream", "--replicas", &closed])
        .args(["--duration", "1", "--rate", "3", "--per-call-timeout", "1"])
        .arg("--no-progress")
        .arg("--log-file")
        .arg(&log)
        .assert()
        .success()
        .stdout(predicate::str::contains("Duration:         2s"))
        .stdout(predicate::str::contains("Total:       6"));

    assert_eq!(csv_rows(&log).len(), 6);
}
