//! Integration tests for the sessionward binary.
//!
//! These run the CLI against an unreachable backend with file-backed storage,
//! so only paths that never touch the network are exercised.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("config.toml");
    let data_dir = dir.join("data");
    std::fs::write(
        &path,
        format!(
            "base_url = \"http://127.0.0.1:9/api/\"\ndata_dir = {:?}\n",
            data_dir.to_string_lossy()
        ),
    )
    .unwrap();
    path
}

fn run(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sessionward"))
        .arg("--no-keyring")
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("SESSIONWARD_BASE_URL")
        .env_remove("RUST_LOG")
        .env_remove("SESSIONWARD_PASSWORD")
        .output()
        .unwrap()
}

#[test]
fn test_status_without_session() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = run(&config, &["status", "--format", "json"]);
    assert!(output.status.success());

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["authenticated"], false);
    assert!(status["access_expires_at"].is_null());
}

#[test]
fn test_protected_request_without_session_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = run(&config, &["request", "enrollments/my-enrollments/"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/login"), "stderr was: {stderr}");
}

#[test]
fn test_logout_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    assert!(run(&config, &["logout"]).status.success());
    assert!(run(&config, &["logout"]).status.success());
}

#[test]
fn test_refresh_without_session_fails() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = run(&config, &["refresh"]);
    assert!(!output.status.success());
}

#[test]
fn test_login_without_terminal_does_not_read_password_from_stdin() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path());

    let output = run(&config, &["login", "ada@example.com"]);
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read password"), "stderr was: {stderr}");
    assert!(output.stdout.is_empty());
}
