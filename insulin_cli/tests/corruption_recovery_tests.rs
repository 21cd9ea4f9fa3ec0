//! Corruption and recovery tests for iobkit.
//!
//! These tests verify graceful handling of:
//! - Truncated or garbled JSONL records
//! - Empty data files
//! - Invalid configuration

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use tempfile::TempDir;

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("iobkit"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn empty_config(temp_dir: &TempDir) -> std::path::PathBuf {
    let path = temp_dir.path().join("config.toml");
    fs::write(&path, "").unwrap();
    path
}

#[test]
fn test_partial_glucose_line() {
    let temp_dir = setup_test_dir();
    let config = empty_config(&temp_dir);

    // A crash mid-append leaves a partial last line
    let mut file = fs::File::create(temp_dir.path().join("glucose.jsonl")).unwrap();
    for (minute, value) in [(0, 100.0), (5, 104.0), (10, 108.0)] {
        writeln!(
            file,
            r#"{{"start_date":"2024-03-01T12:{:02}:00Z","quantity":{},"provenance_identifier":"cgm"}}"#,
            minute, value
        )
        .unwrap();
    }
    write!(file, r#"{{"start_date":"2024-03-01T12:15"#).unwrap();
    drop(file);

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("momentum")
        .assert()
        .success()
        .stdout(predicate::str::contains("2024-03-01T12:10:00Z"));
}

#[test]
fn test_empty_files() {
    let temp_dir = setup_test_dir();
    let config = empty_config(&temp_dir);
    for name in ["events.jsonl", "reservoir.jsonl", "glucose.jsonl"] {
        fs::File::create(temp_dir.path().join(name)).unwrap();
    }

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("reconcile")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("check-reservoir")
        .assert()
        .success()
        .stdout(predicate::str::contains("No reservoir readings"));
}

#[test]
fn test_corrupted_config_file() {
    let temp_dir = setup_test_dir();
    let config = temp_dir.path().join("config.toml");
    fs::write(&config, "[insulin_model\naction_duration_minutes = ").unwrap();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("reconcile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Toml"));
}

#[test]
fn test_invalid_model_in_config() {
    let temp_dir = setup_test_dir();
    let config = temp_dir.path().join("config.toml");
    fs::write(
        &config,
        "[insulin_model]\naction_duration_minutes = 120\npeak_activity_minutes = 90\n",
    )
    .unwrap();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(&config)
        .arg("iob")
        .assert()
        .failure()
        .stderr(predicate::str::contains("InvalidInsulinModel"));
}

#[test]
fn test_missing_config_file() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("--data-dir")
        .arg(temp_dir.path())
        .arg("--config")
        .arg(temp_dir.path().join("nope.toml"))
        .arg("reconcile")
        .assert()
        .failure();
}
