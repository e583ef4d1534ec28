use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

const VALID: &str = r#"
sync:
  direction: broker_to_directory
directory:
  baseUrl: http://127.0.0.1:1
  apiKey: k
  agentId: a
  middlewareId: m
  timeoutSeconds: 1
  retryCount: 0
broker:
  bootstrapServers:
    - 127.0.0.1:1
"#;

const MISSING_DIRECTION: &str = r#"
directory:
  apiKey: k
  agentId: a
  middlewareId: m
broker:
  bootstrapServers:
    - 127.0.0.1:1
"#;

fn stargazer_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("stargazer"));
    // Keep the caller's environment out of configuration overrides.
    for key in [
        "SYNC_DIRECTION",
        "DIRECTORY_APIKEY",
        "DIRECTORY_AGENTID",
        "DIRECTORY_MIDDLEWAREID",
        "BROKER_BOOTSTRAPSERVERS",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

fn write(dir: &Path, name: &str, contents: &str) {
    fs::write(dir.join(name), contents).expect("write config");
}

#[test]
fn check_accepts_a_valid_unit() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "billing.yaml", VALID);

    stargazer_cmd()
        .args(["check"])
        .arg(dir.path().join("billing.yaml"))
        .assert()
        .success()
        .stdout(contains("✓ billing"))
        .stdout(contains("1 valid, 0 invalid"));
}

#[test]
fn check_reports_every_invalid_unit_in_a_directory() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "billing.yaml", VALID);
    write(dir.path(), "orders.yml", MISSING_DIRECTION);
    write(dir.path(), "notes.txt", "ignored");

    stargazer_cmd()
        .args(["check"])
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(contains("✓ billing"))
        .stdout(contains("✗"))
        .stdout(contains("sync.direction"))
        .stdout(contains("1 valid, 1 invalid"));
}

#[test]
fn check_json_lists_units() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "billing.yaml", VALID);

    let output = stargazer_cmd()
        .args(["check", "--json"])
        .arg(dir.path())
        .output()
        .expect("run");
    assert!(output.status.success());
    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(reports[0]["name"], "billing");
    assert!(reports[0].get("error").is_none());
}

#[test]
fn check_fails_on_missing_path() {
    let dir = TempDir::new().expect("tempdir");
    stargazer_cmd()
        .args(["check"])
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("cannot read configuration"));
}

#[test]
fn check_fails_on_empty_directory() {
    let dir = TempDir::new().expect("tempdir");
    stargazer_cmd()
        .args(["check"])
        .arg(dir.path())
        .assert()
        .failure();
}

#[test]
fn run_exits_before_serving_when_path_is_missing() {
    let dir = TempDir::new().expect("tempdir");
    stargazer_cmd()
        .args(["run", "--health-port", "0", "--metrics-port", "0"])
        .arg(dir.path().join("absent"))
        .assert()
        .failure()
        .stderr(contains("stargazer exited with error"));
}

#[test]
fn run_exits_before_serving_when_single_unit_is_invalid() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "orders.yaml", MISSING_DIRECTION);
    stargazer_cmd()
        .args(["run"])
        .arg(dir.path().join("orders.yaml"))
        .assert()
        .failure()
        .stderr(contains("sync.direction"));
}

#[test]
fn plan_reports_unreachable_instances() {
    let dir = TempDir::new().expect("tempdir");
    write(dir.path(), "billing.yaml", VALID);
    stargazer_cmd()
        .args(["plan"])
        .arg(dir.path())
        .assert()
        .failure()
        .stdout(contains("✗ billing"))
        .stderr(contains("could not be planned"));
}
