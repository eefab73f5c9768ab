use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn unknown_task_produces_usage_error() {
    // clap reports an invalid enum value with the accepted alternatives
    Command::cargo_bin("devstrap")
        .expect("binary should build")
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"))
        .stderr(predicate::str::contains("possible values"));
}

#[test]
fn missing_task_produces_usage_error() {
    Command::cargo_bin("devstrap")
        .expect("binary should build")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_the_pipeline_variants() {
    Command::cargo_bin("devstrap")
        .expect("binary should build")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dev"))
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("clean"));
}

#[test]
fn invalid_log_level_is_rejected() {
    Command::cargo_bin("devstrap")
        .expect("binary should build")
        .args(["dev", "--log-level", "loud"])
        .assert()
        .failure();
}

#[test]
fn unreadable_config_fails_with_nonzero_exit() {
    Command::cargo_bin("devstrap")
        .expect("binary should build")
        .args(["clean", "--config", "/nonexistent/devstrap.yaml"])
        .assert()
        .failure();
}
