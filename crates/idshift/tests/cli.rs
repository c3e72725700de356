//! Integration tests for the idshift binary.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn idshift() -> Command {
    Command::cargo_bin("idshift").unwrap()
}

#[test]
fn test_parse_prints_merged_map() {
    idshift()
        .args(["parse", "b:0:100000:65536", "u:1000:1000:1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("u 0 100000 1000\n"))
        .stdout(predicate::str::contains("u 1000 1000 1\n"))
        .stdout(predicate::str::contains("u 1001 101001 64535\n"))
        .stdout(predicate::str::contains("g 0 100000 65536\n"));
}

#[test]
fn test_parse_json_output() {
    idshift()
        .args(["parse", "u:0:100000:65536"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hostid\":100000"));
}

#[test]
fn test_parse_rejects_bad_entry() {
    idshift()
        .args(["parse", "q:0:1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Bad idmap"));
}

#[test]
fn test_map_reads_custom_dirs() {
    let temp = tempdir().unwrap();
    let proc_dir = temp.path().join("proc");
    let etc_dir = temp.path().join("etc");
    fs::create_dir_all(&proc_dir).unwrap();
    fs::create_dir_all(&etc_dir).unwrap();
    fs::write(proc_dir.join("uid_map"), "0 0 4294967295\n").unwrap();
    fs::write(proc_dir.join("gid_map"), "0 0 4294967295\n").unwrap();
    fs::write(etc_dir.join("subuid"), "alice:100000:65536\n").unwrap();
    fs::write(etc_dir.join("subgid"), "alice:300000:65536\n").unwrap();

    idshift()
        .arg("--proc-dir")
        .arg(&proc_dir)
        .arg("--etc-dir")
        .arg(&etc_dir)
        .args(["map", "--user", "alice"])
        .assert()
        .success()
        .stdout("u 0 100000 65536\ng 0 300000 65536\n");

    idshift()
        .env("IDSHIFT_PROC_DIR", &proc_dir)
        .arg("kernel")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(
            "u 0 0 4294967295\ng 0 0 4294967295\n",
        ))
        .stdout(predicate::str::contains("valid uid range 0-4294967294"));
}

#[test]
fn test_map_without_allocation_is_privileged_only() {
    let temp = tempdir().unwrap();
    let proc_dir = temp.path().join("proc");
    let etc_dir = temp.path().join("etc");
    fs::create_dir_all(&proc_dir).unwrap();
    fs::create_dir_all(&etc_dir).unwrap();
    fs::write(proc_dir.join("uid_map"), "0 100000 65536\n").unwrap();
    fs::write(proc_dir.join("gid_map"), "0 100000 65536\n").unwrap();
    fs::write(etc_dir.join("subuid"), "alice:100000:65536\n").unwrap();
    fs::write(etc_dir.join("subgid"), "alice:100000:65536\n").unwrap();

    idshift()
        .arg("--proc-dir")
        .arg(&proc_dir)
        .arg("--etc-dir")
        .arg(&etc_dir)
        .args(["map", "--user", "alice"])
        .assert()
        .success()
        .stdout("Only privileged containers will be able to run\n");
}

#[test]
fn test_shift_dry_run_lists_tree() {
    let temp = tempdir().unwrap();
    let rootfs = temp.path().join("rootfs");
    fs::create_dir_all(rootfs.join("etc")).unwrap();
    fs::write(rootfs.join("etc/hostname"), "box\n").unwrap();

    idshift()
        .arg("shift")
        .arg(&rootfs)
        .args(["-m", "b:0:100000:4294867295", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("would shift").count(3))
        .stdout(predicate::str::contains("hostname to "));
}

#[test]
fn test_shift_missing_dir_fails() {
    let temp = tempdir().unwrap();

    idshift()
        .arg("shift")
        .arg(temp.path().join("nope"))
        .args(["-m", "b:0:100000:65536"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));
}
