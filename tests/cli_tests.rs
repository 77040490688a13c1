//! Integration tests for the CLI interface
//!
//! Commands that only read parameters and checkpoints

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn tomoflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tomoflow").unwrap();
    cmd.arg("--workdir").arg(dir.path());
    cmd
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = Command::cargo_bin("tomoflow").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("print-flow"))
        .stdout(predicate::str::contains("\n  task ").not());
}

#[test]
fn test_invalid_command() {
    let mut cmd = Command::cargo_bin("tomoflow").unwrap();
    cmd.arg("invalid-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_print_flow_lists_numbered_steps() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .args(["print-flow", "inversion"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1: generate_synthetic_data"))
        .stdout(predicate::str::contains("4: evaluate_gradient"))
        .stdout(predicate::str::contains("9: finalize_iteration"));
}

#[test]
fn test_unknown_workflow_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .args(["print-flow", "tomography"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("tomography"));
}

#[test]
fn test_params_lists_declarations() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .args(["params", "inversion"])
        .assert()
        .success()
        .stdout(predicate::str::contains("STEP_COUNT_MAX (integer, default: 10)"))
        .stdout(predicate::str::contains("MODEL_INIT (path, required)"))
        .stdout(predicate::str::contains("OPTIMIZE_BIN"));
}

#[test]
fn test_check_reports_every_problem() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("parameters.yaml"), "CASE: real\nNTASK: 0\n").unwrap();

    tomoflow(&dir)
        .args(["check", "forward"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("MODEL_INIT"))
        .stderr(predicate::str::contains("SOLVER_BIN"))
        .stderr(predicate::str::contains("PREPROCESS_BIN"));
}

#[test]
fn test_check_accepts_complete_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("parameters.yaml"),
        "CASE: data\nMODEL_INIT: model\nDATA: data\nSOLVER_BIN: solver\nPREPROCESS_BIN: pre\n",
    )
    .unwrap();

    tomoflow(&dir)
        .args(["check", "forward"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid for the forward workflow"));
}

#[test]
fn test_missing_parameter_file() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .args(["check", "forward"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_alternate_parameter_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("inputs.toml"),
        "CASE = \"data\"\nMODEL_INIT = \"model\"\nDATA = \"data\"\nSOLVER_BIN = \"solver\"\nPREPROCESS_BIN = \"pre\"\n",
    )
    .unwrap();

    tomoflow(&dir)
        .args(["-p", "inputs.toml", "check", "forward"])
        .assert()
        .success();
}

#[test]
fn test_status_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoint at"));
}

#[test]
fn test_restart_without_checkpoint() {
    let dir = TempDir::new().unwrap();
    tomoflow(&dir)
        .arg("restart")
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoint.json to remove"));
}

#[test]
fn test_status_reads_configured_output() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("parameters.yaml"), "OUTPUT: results\n").unwrap();
    fs::create_dir_all(dir.path().join("results")).unwrap();
    fs::write(
        dir.path().join("results/checkpoint.json"),
        r#"{
  "version": 1,
  "workflow": "migration",
  "last_completed_step": "evaluate_gradient",
  "pass": 1,
  "state": {"f_new": 2.5},
  "status": "in_progress",
  "updated_at": "2026-01-01T00:00:00Z",
  "run_id": "7f1c2a4e-1b2c-4d5e-8f90-123456789abc"
}"#,
    )
    .unwrap();

    tomoflow(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("workflow:  migration"))
        .stdout(predicate::str::contains("last step: evaluate_gradient"))
        .stdout(predicate::str::contains("state:     f_new"));

    tomoflow(&dir)
        .arg("restart")
        .assert()
        .success()
        .stdout(predicate::str::contains("Checkpoint removed"));
    assert!(!dir.path().join("results/checkpoint.json").exists());
}
