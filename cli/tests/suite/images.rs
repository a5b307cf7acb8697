#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;

use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn socker() -> Command {
    let mut cmd = Command::cargo_bin("socker").expect("socker binary");
    for var in [
        "SOCKER_VERBOSE",
        "SOCKER_EPILOG",
        "SOCKER_INSECURE",
        "SOCKER_PTY_ROWS",
        "SOCKER_PTY_COLS",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn lists_images_from_a_hub_file() {
    let dir = TempDir::new().expect("tempdir");
    let hub = dir.path().join("images.yaml");
    std::fs::write(
        &hub,
        "images:\n  - name: ubuntu:22.04\n    description: Ubuntu base image\n  - name: alpine\n",
    )
    .expect("write hub");

    let output = socker()
        .args(["images", "-c"])
        .arg(&hub)
        .output()
        .expect("run socker");

    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).expect("utf8"),
        "IMAGE         DESCRIPTION\nubuntu:22.04  Ubuntu base image\nalpine\n"
    );
}

#[test]
fn merges_a_directory_of_hub_files_in_name_order() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("b.yml"), "images:\n  - name: second\n").expect("write b");
    std::fs::write(dir.path().join("a.yaml"), "images:\n  - name: first\n").expect("write a");
    std::fs::write(dir.path().join("notes.txt"), "not yaml: [").expect("write notes");

    socker()
        .args(["images", "--config"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("first\nsecond\n"));
}

#[test]
fn missing_hub_file_fails() {
    let dir = TempDir::new().expect("tempdir");

    socker()
        .args(["images", "-c"])
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("socker: "));
}

#[test]
fn malformed_hub_names_the_file() {
    let dir = TempDir::new().expect("tempdir");
    let hub = dir.path().join("broken.yaml");
    std::fs::write(&hub, "images: [name: {").expect("write hub");

    socker()
        .args(["images", "-c"])
        .arg(&hub)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("broken.yaml"));
}

#[test]
fn hub_the_caller_cannot_read_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let hub = dir.path().join("private.yaml");
    std::fs::write(&hub, "images: SECRET_TOKEN_abc123\n").expect("write hub");
    std::fs::set_permissions(&hub, std::fs::Permissions::from_mode(0o000)).expect("chmod");
    if std::fs::read(&hub).is_ok() {
        // Running as root: every file is readable.
        return;
    }

    socker()
        .args(["images", "-c"])
        .arg(&hub)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("SECRET_TOKEN").not());
}
