//! End-to-end runs of the `outbox` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn outbox(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("outbox").unwrap();
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("outbox")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("enqueue"))
        .stdout(predicate::str::contains("clear-errors"));
}

#[test]
fn enqueue_then_sync() {
    let dir = tempdir().unwrap();

    outbox(dir.path())
        .args(["enqueue", "--kind", "profile", "--entity", "42", "--op", "update"])
        .args(["--payload", r#"{"bio": "hello"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("Queued"));

    outbox(dir.path())
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"bio\": \"hello\""));

    outbox(dir.path())
        .args(["sync", "--mock"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Succeeded:          1"));

    outbox(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Operations: none"));
}

#[test]
fn sync_without_backend_fails() {
    let dir = tempdir().unwrap();
    outbox(dir.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--mock"));
}

#[test]
fn bad_operation_type_is_rejected() {
    let dir = tempdir().unwrap();
    outbox(dir.path())
        .args(["enqueue", "--kind", "profile", "--entity", "42", "--op", "upsert"])
        .assert()
        .failure();
}

#[test]
fn rejected_operation_surfaces_error() {
    let dir = tempdir().unwrap();

    outbox(dir.path())
        .args(["enqueue", "--kind", "note", "--entity", "1", "--op", "delete"])
        .assert()
        .success();

    outbox(dir.path())
        .args(["sync", "--mock", "--reject", "note is locked"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Failed:             1"));

    outbox(dir.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("note is locked"))
        .stdout(predicate::str::contains("failed_terminal"));

    outbox(dir.path())
        .arg("clear-errors")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared 1 sync errors."));
}
