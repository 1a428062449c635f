mod common;

use common::{treecheck_cmd, write_tree};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

#[test]
fn baseline_writes_default_log_in_root() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("a.txt", "hello"), ("dir/b.txt", "world")]);

    treecheck_cmd(temp.path())
        .arg("baseline")
        .assert()
        .success()
        .stdout(predicate::str::contains("Baseline written to"))
        .stdout(predicate::str::contains("Total files : 2"))
        .stdout(predicate::str::contains("Total dirs  : 1"));

    let log = fs::read_to_string(temp.path().join(".integrity_hash.log")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|l| l.starts_with("DIR  dir  ")));
    assert!(lines.iter().any(|l| l.starts_with("FILE  3610a686  a.txt  5  ")));
    assert!(lines.iter().any(|l| l.contains("  dir/b.txt  5  ")));
}

#[test]
fn baseline_log_option_and_positional_path() {
    let temp = TempDir::new().unwrap();
    let tree = temp.path().join("tree");
    write_tree(&tree, &[("a.txt", "hello")]);

    treecheck_cmd(temp.path())
        .arg("baseline")
        .arg("tree")
        .arg("--log")
        .arg("tree.log")
        .arg("--threads")
        .arg("2")
        .assert()
        .success();

    assert!(temp.path().join("tree.log").exists());
    assert!(!tree.join(".integrity_hash.log").exists());
    let log = fs::read_to_string(temp.path().join("tree.log")).unwrap();
    assert!(log.contains("  a.txt  5  "));
}

#[test]
fn rerunning_baseline_does_not_record_its_own_log() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("a.txt", "hello")]);

    for _ in 0..2 {
        treecheck_cmd(temp.path()).arg("baseline").assert().success();
    }

    let log = fs::read_to_string(temp.path().join(".integrity_hash.log")).unwrap();
    assert_eq!(log.lines().count(), 1);
    assert!(!log.contains(".integrity_hash.log"));
    assert!(!log.contains(".treecheck-partial-"));
}

#[test]
fn baseline_missing_root_fails_without_log() {
    let temp = TempDir::new().unwrap();

    treecheck_cmd(temp.path())
        .arg("baseline")
        .arg("absent")
        .arg("--log")
        .arg("absent.log")
        .assert()
        .code(255)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("Scan root not found"));

    assert!(!temp.path().join("absent.log").exists());
}

#[test]
fn zero_threads_is_rejected() {
    let temp = TempDir::new().unwrap();

    treecheck_cmd(temp.path())
        .arg("baseline")
        .arg("--threads")
        .arg("0")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("Worker count must be at least 1"));
}

#[test]
fn config_file_supplies_settings() {
    let temp = TempDir::new().unwrap();
    write_tree(&temp.path().join("data"), &[("a.txt", "hello")]);
    fs::write(
        temp.path().join("treecheck.toml"),
        "[scan]\npath = \"data\"\nthreads = 2\nlog = \"data.log\"\n",
    )
    .unwrap();

    treecheck_cmd(temp.path())
        .arg("--config")
        .arg("treecheck.toml")
        .arg("baseline")
        .assert()
        .success();

    assert!(temp.path().join("data.log").exists());
}

#[test]
fn config_file_with_unknown_key_fails() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("treecheck.toml"), "[scan]\nworkers = 2\n").unwrap();

    treecheck_cmd(temp.path())
        .arg("--config")
        .arg("treecheck.toml")
        .arg("baseline")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("TOML parse error"));
}

#[cfg(unix)]
#[test]
fn baseline_records_unreadable_file_and_succeeds() {
    use std::os::unix::fs::PermissionsExt;

    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let temp = TempDir::new().unwrap();
    write_tree(temp.path(), &[("a.txt", "hello"), ("secret.txt", "shh")]);
    let secret = temp.path().join("secret.txt");
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

    let assert = treecheck_cmd(temp.path()).arg("baseline").assert();
    fs::set_permissions(&secret, fs::Permissions::from_mode(0o644)).unwrap();

    assert
        .success()
        .stdout(predicate::str::contains("Unreadable  : 1"));
    let log = fs::read_to_string(temp.path().join(".integrity_hash.log")).unwrap();
    assert!(log.contains("FILE  -  secret.txt  -  -  -  -"));
}
