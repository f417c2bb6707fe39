//! Binary-level checks for the stressforge CLI.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_run_rejects_zero_duration() {
    Command::cargo_bin("stressforge")
        .unwrap()
        .args(["run", "--duration", "0", "--cpu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("duration"));
}

#[test]
fn test_probe_json_is_machine_parseable() {
    let output = Command::cargo_bin("stressforge")
        .unwrap()
        .env("RUST_LOG", "error")
        .args(["probe", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let probe: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert!(probe["logical_cores"].as_u64().unwrap() >= 1);
}

#[test]
fn test_one_second_cpu_run_reports_clean_json() {
    let output = Command::cargo_bin("stressforge")
        .unwrap()
        .env("RUST_LOG", "error")
        .args([
            "run",
            "--duration",
            "1",
            "--cpu",
            "--cpu-workers",
            "1",
            "--json",
        ])
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(report["workers_launched"]["cpu"], 1);
    assert_eq!(report["failures"].as_array().unwrap().len(), 0);
}
