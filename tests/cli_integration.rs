//! Integration tests for the ticketlog CLI
//!
//! These run the real binary against a temporary store. Nothing here needs
//! network access: commands that would reach the service are only exercised
//! up to their credential check.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const CREDENTIAL_VARS: &[&str] = &[
    "TICKETLOG_ORG",
    "TICKETLOG_PROJECT",
    "TICKETLOG_PAT",
    "AZURE_DEVOPS_ORG",
    "AZURE_DEVOPS_PROJECT",
    "AZURE_DEVOPS_PAT",
];

/// Helper to run ticketlog with a specific store path, isolated from the caller's environment
fn run_ticketlog(args: &[&str], db_path: &PathBuf, cwd: &Path) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ticketlog"));
    cmd.args(args)
        .current_dir(cwd)
        .env("TICKETLOG_DB_PATH", db_path)
        .env_remove("RUST_LOG");
    for var in CREDENTIAL_VARS {
        cmd.env_remove(var);
    }
    cmd.output().expect("Failed to execute ticketlog")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("ticketlog"));
    assert!(out.contains("ingest"));
    assert!(out.contains("classification"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("ticketlog"));
}

#[test]
fn test_ingest_help_lists_run_controls() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .args(["ingest", "--help"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("--chunk-size"));
    assert!(out.contains("--deadline"));
    assert!(out.contains("--reset"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion zsh failed: {}",
        stderr(&output)
    );
    assert!(
        stdout(&output).contains("#compdef ticketlog"),
        "zsh completion should contain #compdef"
    );
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("_ticketlog"));
}

#[test]
fn test_completion_rejects_unknown_shell() {
    let output = Command::new(env!("CARGO_BIN_EXE_ticketlog"))
        .args(["completion", "cmd.exe"])
        .output()
        .expect("Failed to execute");

    assert!(!output.status.success());
}

// =============================================================================
// Store Commands
// =============================================================================

#[test]
fn test_status_on_fresh_store() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("history.db");

    let output = run_ticketlog(&["status"], &db_path, temp_dir.path());
    assert!(output.status.success(), "status failed: {}", stderr(&output));

    let out = stdout(&output);
    assert!(out
        .lines()
        .any(|l| l.trim_start().starts_with("work items:") && l.trim_end().ends_with(" 0")));
    assert!(out.contains("v1.2.0"));
    assert!(out.contains("No runs recorded"));
    assert!(db_path.exists());
}

#[test]
fn test_reset_creates_store() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("nested").join("history.db");

    let output = run_ticketlog(&["reset"], &db_path, temp_dir.path());
    assert!(output.status.success(), "reset failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Store reset"));
    assert!(db_path.exists());
}

#[test]
fn test_db_flag_overrides_env_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let env_path = temp_dir.path().join("env.db");
    let flag_path = temp_dir.path().join("flag.db");

    let output = run_ticketlog(
        &["status", "--db", flag_path.to_str().unwrap()],
        &env_path,
        temp_dir.path(),
    );
    assert!(output.status.success(), "status failed: {}", stderr(&output));
    assert!(flag_path.exists());
    assert!(!env_path.exists());
}

// =============================================================================
// Configuration Errors
// =============================================================================

#[test]
fn test_ingest_without_credentials_fails_before_network() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("history.db");

    let output = run_ticketlog(&["ingest"], &db_path, temp_dir.path());
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("Missing organization"), "unexpected stderr: {}", err);
    assert!(!db_path.exists());
}

#[test]
fn test_project_from_config_still_needs_token() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("history.db");
    let config_dir = temp_dir.path().join(".ticketlog");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(
        config_dir.join("config.toml"),
        "[remote]\norganization = \"contoso\"\nproject = \"Fabrikam\"\n",
    )
    .unwrap();

    let output = run_ticketlog(&["classification", "--group", "areas"], &db_path, temp_dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("personal access token"));
}

#[test]
fn test_invalid_config_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("history.db");
    let config_path = temp_dir.path().join("broken.toml");
    std::fs::write(&config_path, "[ingest]\nchunk_size = \"lots\"\n").unwrap();

    let output = run_ticketlog(
        &["status", "--config", config_path.to_str().unwrap()],
        &db_path,
        temp_dir.path(),
    );
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid config"));
}

#[test]
fn test_unknown_group_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("history.db");

    let output = run_ticketlog(&["classification", "--group", "sprints"], &db_path, temp_dir.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("unknown structure group"));
}
