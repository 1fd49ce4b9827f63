//! Tests for the `dma` binary.
//!
//! Only paths that need neither a database nor the network API are run:
//! argument handling, configuration errors and offline evaluation.

#![allow(clippy::pedantic)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

use dma::facts::names;
use dma::{Collection, EngineKind, FactSet};

fn dma() -> Command {
    let mut cmd = Command::cargo_bin("dma").unwrap();
    cmd.env_remove("DMA_PASSWORD")
        .env_remove("DMA_ACCESS_TOKEN")
        .env_remove("DMA_LOG");
    cmd
}

fn write_mysql_collection(dir: &Path) -> std::path::PathBuf {
    let collection = Collection {
        collection_identifier: "shop-db".to_string(),
        engine: EngineKind::MySql,
        collected_at: chrono::Utc::now(),
        facts: FactSet::new()
            .with(names::VERSION, "5.7.44")
            .with(names::VERSION_MAJOR, 5_i64)
            .with(names::VERSION_MINOR, 7_i64)
            .with(names::MYSQL_LOG_BIN, false),
    };
    let path = dir.join("shop-db.facts.json");
    std::fs::write(&path, serde_json::to_string_pretty(&collection).unwrap()).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    dma()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("collect-data"))
        .stdout(predicate::str::contains("readiness-check"))
        .stdout(predicate::str::contains("connectivity-check"));
}

#[test]
fn test_offline_readiness_check_prints_json() {
    // Arrange
    let dir = TempDir::new().unwrap();
    let collection = write_mysql_collection(dir.path());
    let output_dir = dir.path().join("out");

    // Act
    let assert = dma()
        .args(["readiness-check", "--format", "json", "--from-collection"])
        .arg(&collection)
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .success();

    // Assert
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["verdict"], "not_ready");
    assert_eq!(report["database_identifier"], "shop-db");
    assert!(output_dir.join("shop-db.report.json").exists());
}

#[test]
fn test_offline_readiness_check_prints_table() {
    let dir = TempDir::new().unwrap();
    let collection = write_mysql_collection(dir.path());

    dma()
        .args(["readiness-check", "--parallel", "--from-collection"])
        .arg(&collection)
        .arg("--output-dir")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("mysql.binary_log_enabled"))
        .stdout(predicate::str::contains("NOT READY"));
}

#[test]
fn test_missing_collection_document_fails() {
    dma()
        .args(["readiness-check", "--from-collection", "/nonexistent/doc.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("cannot read collection document"));
}

#[test]
fn test_missing_parameter_without_terminal_is_config_error() {
    dma()
        .args(["collect-data", "--db-type", "postgres", "-H", "localhost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("DMA-001"))
        .stderr(predicate::str::contains("missing required parameter"));
}

#[test]
fn test_confirmation_without_terminal_needs_no_prompt() {
    dma()
        .args([
            "collect-data",
            "--db-type",
            "postgres",
            "-H",
            "localhost",
            "-d",
            "orders",
            "-u",
            "assessor",
        ])
        .env("DMA_PASSWORD", "secret")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--no-prompt"));
}

#[cfg(not(feature = "oracle"))]
#[test]
fn test_engine_without_driver_is_unsupported() {
    let dir = TempDir::new().unwrap();
    dma()
        .args([
            "collect-data",
            "--no-prompt",
            "--db-type",
            "oracle",
            "-H",
            "localhost",
            "-d",
            "ORCLPDB1",
            "-u",
            "system",
            "--password",
            "secret",
            "--output-dir",
        ])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("DMA-006"));
}

#[test]
fn test_unknown_engine_is_rejected() {
    dma()
        .args(["collect-data", "--db-type", "db2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown database type"));
}

#[test]
fn test_invalid_operation_type_is_rejected() {
    dma()
        .args(["connectivity-check", "--operation-type", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid operation type"));
}

#[test]
fn test_invalid_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("dma.yaml");
    std::fs::write(&config, "options:\n  timeout_secs: 0\n").unwrap();
    let collection = write_mysql_collection(dir.path());

    dma()
        .arg("--config")
        .arg(&config)
        .args(["readiness-check", "--from-collection"])
        .arg(&collection)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("timeout_secs must be greater than 0"));
}
