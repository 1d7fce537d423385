//! End-to-end tests for the `scope` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn scope() -> Command {
    Command::cargo_bin("scope").unwrap()
}

#[test]
fn test_help_lists_subcommands() {
    scope()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("compare"))
        .stdout(predicate::str::contains("metrics"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("models"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_compare_requires_experiment_id() {
    scope()
        .arg("compare")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--id"));
}

#[test]
fn test_compare_rejects_unknown_metric_type() {
    scope()
        .args(["compare", "--id", "1", "--type", "testing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("testing"));
}

#[test]
fn test_invalid_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("scope.yaml");
    std::fs::write(&path, "port: [1, 2]\n").unwrap();
    scope()
        .args(["--config", path.to_str().unwrap(), "models", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("YAML"));
}

#[test]
fn test_unreachable_master_fails() {
    let tmp = TempDir::new().unwrap();
    scope()
        .args([
            "--config",
            tmp.path().join("missing.yaml").to_str().unwrap(),
            "--master",
            "http://127.0.0.1:1",
            "models",
            "list",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP error"));
}

#[test]
fn test_log_file_is_written() {
    let tmp = TempDir::new().unwrap();
    let log = tmp.path().join("logs").join("scope.log");
    scope()
        .env("RUST_LOG", "debug")
        .args([
            "--log-file",
            log.to_str().unwrap(),
            "--config",
            tmp.path().join("missing.yaml").to_str().unwrap(),
            "--master",
            "http://127.0.0.1:1",
            "models",
            "list",
        ])
        .assert()
        .failure();
    assert!(log.exists());
}

#[test]
fn test_models_help_lists_actions() {
    scope()
        .args(["models", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("archive"))
        .stdout(predicate::str::contains("unarchive"))
        .stdout(predicate::str::contains("delete"))
        .stdout(predicate::str::contains("patch"));
}

#[test]
fn test_model_delete_needs_confirmation() {
    let tmp = TempDir::new().unwrap();
    scope()
        .args([
            "--config",
            tmp.path().join("missing.yaml").to_str().unwrap(),
            "--master",
            "http://127.0.0.1:1",
            "models",
            "delete",
            "resnet",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_model_patch_needs_a_change() {
    let tmp = TempDir::new().unwrap();
    scope()
        .args([
            "--config",
            tmp.path().join("missing.yaml").to_str().unwrap(),
            "models",
            "patch",
            "resnet",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nothing to update"));
}

#[test]
fn test_model_delete_reaches_master_when_confirmed() {
    let tmp = TempDir::new().unwrap();
    scope()
        .args([
            "--config",
            tmp.path().join("missing.yaml").to_str().unwrap(),
            "--master",
            "http://127.0.0.1:1",
            "models",
            "delete",
            "resnet",
            "--yes",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HTTP error"));
}
