//! CLI tests for `headless check`.
//!
//! Spawns the headless binary in a scratch project directory and verifies
//! exit codes and how `.env` files feed configuration and logging.

use std::fs;
use std::process::{Command, Output};

use headless::exit_codes;

const CONFIG_VARS: &[&str] = &[
    "RUST_LOG",
    "PROJECT_DIR",
    "CLAUDE_PATH",
    "CLAUDE_TIMEOUT_MINUTES",
    "POLL_INTERVAL_MS",
    "GITHUB_POLL_MINUTES",
];

fn check(dir: &std::path::Path) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_headless"));
    cmd.current_dir(dir).arg("check");
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd.output().expect("headless check")
}

#[test]
fn check_succeeds_with_defaults() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = check(temp.path());

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("timeout: 30 minute(s)"), "{stdout}");
}

#[test]
fn dotenv_log_filter_applies_to_startup() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(".env"), "RUST_LOG=headless=debug\n").expect("write .env");
    fs::write(temp.path().join("headless.toml"), "timeout_minutes = 15\n").expect("write toml");

    let output = check(temp.path());

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("config file loaded"), "{stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("timeout: 15 minute(s)"), "{stdout}");
}

#[test]
fn invalid_dotenv_value_exits_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join(".env"), "CLAUDE_TIMEOUT_MINUTES=500\n").expect("write .env");

    let output = check(temp.path());

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CLAUDE_TIMEOUT_MINUTES"), "{stderr}");
}
