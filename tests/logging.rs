mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{treecheck_cmd, write_tree};
use predicates::prelude::*;
use tempfile::TempDir;

fn temp_dir_with_file() -> TempDir {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("file.txt", "hello")]);
    temp
}

#[test]
fn baseline_without_flags_respects_rust_log_info() {
    let temp = temp_dir_with_file();

    treecheck_cmd(temp.path())
        .env("RUST_LOG", "info")
        .arg("baseline")
        .assert()
        .success()
        .stderr(predicate::str::contains("Baseline written to"));
}

#[test]
fn baseline_without_flags_respects_rust_log_warn() {
    let temp = temp_dir_with_file();

    treecheck_cmd(temp.path())
        .env("RUST_LOG", "warn")
        .arg("baseline")
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}

#[test]
fn verbose_overrides_rust_log_warn() {
    let temp = temp_dir_with_file();

    treecheck_cmd(temp.path())
        .env("RUST_LOG", "warn")
        .arg("-v")
        .arg("baseline")
        .assert()
        .success()
        .stderr(predicate::str::contains("Baseline written to"));
}

#[test]
fn verbose_debug_overrides_rust_log_warn() {
    let temp = temp_dir_with_file();

    treecheck_cmd(temp.path())
        .env("RUST_LOG", "warn")
        .arg("-vv")
        .arg("baseline")
        .assert()
        .success()
        .stderr(predicate::str::contains("Checksum of"));
}

#[test]
fn log_level_overrides_rust_log_warn() {
    let temp = temp_dir_with_file();

    treecheck_cmd(temp.path())
        .env("RUST_LOG", "warn")
        .arg("--log-level")
        .arg("info")
        .arg("baseline")
        .assert()
        .success()
        .stderr(predicate::str::contains("Baseline written to"));
}

#[test]
fn successful_verify_is_logged_at_info() {
    let temp = temp_dir_with_file();
    common::baseline(temp.path());

    treecheck_cmd(temp.path())
        .arg("-v")
        .arg("verify")
        .assert()
        .success()
        .stderr(predicate::str::contains("Verification successful"));
}

#[test]
fn log_level_conflicts_with_verbose() {
    cargo_bin_cmd!("treecheck")
        .arg("--log-level")
        .arg("info")
        .arg("-v")
        .arg("verify")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--log-level <LEVEL>"))
        .stderr(predicate::str::contains("--verbose"));
}

#[test]
fn help_mentions_rust_log_precedence_for_logging_flags() {
    cargo_bin_cmd!("treecheck")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("-v, --verbose"))
        .stdout(predicate::str::contains("--log-level <LEVEL>"))
        .stdout(predicate::str::contains("Takes precedence over RUST_LOG."));
}

#[test]
fn errors_log_to_stderr_without_emoji_when_not_tty() {
    let temp = temp_dir_with_file();

    // capture() makes stdout/stderr non-tty
    let output = treecheck_cmd(temp.path())
        .arg("verify")
        .assert()
        .code(255)
        .get_output()
        .clone();

    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    for ch in stderr.chars() {
        assert!(
            ch.is_ascii(),
            "stderr unexpectedly contains non-ASCII character: {ch:?}"
        );
    }
    assert!(stderr.contains("ERROR:"), "stderr should include the error prefix");
    assert!(
        stderr.contains("Baseline log not found"),
        "stderr should include the error message"
    );
}
