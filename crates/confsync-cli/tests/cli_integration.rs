//! CLI integration tests
//!
//! Drives the confsync binary end to end against a temporary data
//! directory and defaults file.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_defaults(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("defaults.json");
    std::fs::write(&path, r#"{"theme": "light", "fontSize": 12}"#).unwrap();
    path
}

fn cli_cmd(dir: &TempDir) -> Command {
    let defaults = write_defaults(dir);
    let mut cmd = Command::cargo_bin("confsync").unwrap();
    cmd.arg("--data-dir")
        .arg(dir.path())
        .arg("--defaults")
        .arg(defaults);
    cmd
}

#[test]
fn test_list_shows_defaults() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("theme = \"light\""))
        .stdout(predicate::str::contains("fontSize = 12"));
}

#[test]
fn test_set_then_get_roundtrip() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("set")
        .arg("theme")
        .arg("dark")
        .assert()
        .success()
        .stdout(predicate::str::contains("theme = \"dark\""));

    // Value survives into a fresh process via the persisted database
    cli_cmd(&dir)
        .arg("get")
        .arg("theme")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dark\""));
}

#[test]
fn test_set_parses_json_values() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("set")
        .arg("fontSize")
        .arg("16")
        .assert()
        .success();

    cli_cmd(&dir)
        .arg("get")
        .arg("fontSize")
        .assert()
        .success()
        .stdout(predicate::str::contains("16"));
}

#[test]
fn test_get_unknown_key_fails() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir)
        .arg("get")
        .arg("missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown key"));
}

#[test]
fn test_lock_blocks_set() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir).arg("lock").arg("theme").assert().success();

    cli_cmd(&dir)
        .arg("locked")
        .assert()
        .success()
        .stdout(predicate::str::contains("theme"));

    cli_cmd(&dir)
        .arg("set")
        .arg("theme")
        .arg("dark")
        .assert()
        .success()
        .stdout(predicate::str::contains("locked, write ignored"));

    cli_cmd(&dir)
        .arg("get")
        .arg("theme")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"light\""));
}

#[test]
fn test_unlock_allows_set_again() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir).arg("lock").arg("theme").assert().success();
    cli_cmd(&dir).arg("unlock").arg("theme").assert().success();

    cli_cmd(&dir)
        .arg("set")
        .arg("theme")
        .arg("dark")
        .assert()
        .success()
        .stdout(predicate::str::contains("theme = \"dark\""));
}

#[test]
fn test_reset_restores_defaults() {
    let dir = TempDir::new().unwrap();

    cli_cmd(&dir).arg("set").arg("fontSize").arg("20").assert().success();
    cli_cmd(&dir).arg("reset").assert().success();

    cli_cmd(&dir)
        .arg("get")
        .arg("fontSize")
        .assert()
        .success()
        .stdout(predicate::str::contains("12"));
}

#[test]
fn test_missing_defaults_file_fails() {
    let dir = TempDir::new().unwrap();

    Command::cargo_bin("confsync")
        .unwrap()
        .arg("--data-dir")
        .arg(dir.path())
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--defaults"));
}
