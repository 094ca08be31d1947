use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_run_command() {
    Command::cargo_bin("basalt")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"));
}

#[test]
fn run_help_shows_pool_flags() {
    Command::cargo_bin("basalt")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--workers"))
        .stdout(predicate::str::contains("--metrics-port"));
}

#[test]
fn unknown_command_fails() {
    Command::cargo_bin("basalt")
        .unwrap()
        .arg("frobnicate")
        .assert()
        .failure();
}
