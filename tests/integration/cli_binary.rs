//! Integration tests spawning the compiled binary for parse-level behavior

use assert_cmd::Command;

#[test]
fn test_help_flag_succeeds() {
    let mut cmd = Command::cargo_bin("market-history-sync").unwrap();
    let output = cmd.arg("--help").assert().success();

    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    assert!(stdout.contains("listing"));
    assert!(stdout.contains("history"));
    assert!(stdout.contains("run"));
}

#[test]
fn test_version_flag_succeeds() {
    let mut cmd = Command::cargo_bin("market-history-sync").unwrap();
    cmd.arg("--version").assert().success();
}

#[test]
fn test_missing_region_is_a_usage_error() {
    let mut cmd = Command::cargo_bin("market-history-sync").unwrap();
    cmd.arg("history").assert().failure();
}

#[test]
fn test_unknown_subcommand_is_rejected() {
    let mut cmd = Command::cargo_bin("market-history-sync").unwrap();
    cmd.arg("teardown").assert().failure();
}
