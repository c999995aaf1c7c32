//! Integration tests for CLI argument handling
//!
//! Runs the built binary and checks flag parsing and the fail-fast
//! configuration errors.

use std::process::Command;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_teleguide"))
        .args(args)
        .output()
        .expect("Failed to execute teleguide")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(
        output.status.success(),
        "Expected --help to exit successfully"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("teleguide"), "Help should mention teleguide");
    assert!(stdout.contains("schedule"), "Help should list subcommands");
    assert!(stdout.contains("overview"), "Help should list subcommands");
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success(), "A subcommand is required");
}

#[test]
fn test_negative_cached_days_fails_fast() {
    let output = run_cli(&["--cached-days", "-1", "now", "chan1"]);
    assert!(
        !output.status.success(),
        "Negative retention must be rejected at startup"
    );
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("negative"),
        "Should explain the retention error: {}",
        stderr
    );
}

#[test]
fn test_unknown_timezone_fails_fast() {
    let output = run_cli(&["--timezone", "Mars/Olympus", "now", "chan1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Mars/Olympus"),
        "Should name the bad zone: {}",
        stderr
    );
}
