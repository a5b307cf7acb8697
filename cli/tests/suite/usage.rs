#![allow(clippy::expect_used, clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn images_without_config_is_a_usage_error() {
    Command::cargo_bin("socker")
        .expect("socker binary")
        .arg("images")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--config"));
}

#[test]
fn run_without_image_is_a_usage_error() {
    Command::cargo_bin("socker")
        .expect("socker binary")
        .arg("run")
        .assert()
        .failure();
}

#[test]
fn help_lists_both_subcommands() {
    Command::cargo_bin("socker")
        .expect("socker binary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("images").and(predicate::str::contains("run")));
}
