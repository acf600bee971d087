//! End-to-end tests for the `minicluster` binary.
//!
//! Every test points `MINICLUSTER_HOME` at a fresh temp directory, so only
//! commands that never touch a VM are exercised here.

use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

// =============================================================================
// Test Fixtures
// =============================================================================

fn minicluster(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("minicluster").unwrap();
    cmd.env("MINICLUSTER_HOME", home.path())
        .env_remove("RUST_LOG")
        .env_remove("MINICLUSTER_MEMORY")
        .env_remove("MINICLUSTER_CPUS")
        .env_remove("MINICLUSTER_TIMEOUT");
    cmd
}

// =============================================================================
// Help
// =============================================================================

#[test]
fn help_lists_the_commands() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("start")
                .and(predicate::str::contains("stop"))
                .and(predicate::str::contains("delete"))
                .and(predicate::str::contains("config"))
                .and(predicate::str::contains("image")),
        );
}

#[test]
fn unknown_command_is_a_usage_error() {
    let home = TempDir::new().unwrap();
    minicluster(&home).arg("frobnicate").assert().failure();
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_set_get_and_view() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "memory", "4GB"])
        .assert()
        .success();
    minicluster(&home)
        .args(["config", "set", "cpus", "4"])
        .assert()
        .success();

    minicluster(&home)
        .args(["config", "get", "memory"])
        .assert()
        .success()
        .stdout("4GB\n");

    minicluster(&home)
        .args(["config", "view"])
        .assert()
        .success()
        .stdout(predicate::str::contains("- cpus                 : 4"))
        .stdout(predicate::str::contains("- memory               : 4GB"));

    minicluster(&home)
        .args(["config", "view", "--format", "{{.ConfigKey}}={{.ConfigValue}}"])
        .assert()
        .success()
        .stdout("cpus=4\nmemory=4GB\n");

    home.child("config/config.json")
        .assert(predicate::str::contains("\"memory\""));
}

#[test]
fn config_unset_removes_the_value() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "cpus", "6"])
        .assert()
        .success();
    minicluster(&home)
        .args(["config", "unset", "cpus"])
        .assert()
        .success();
    minicluster(&home)
        .args(["config", "get", "cpus"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn config_get_of_unset_setting_prints_nothing() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "get", "disk-size"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn unknown_setting_fails() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "no-such-setting", "1"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown setting 'no-such-setting'"));
}

#[test]
fn invalid_value_is_rejected_and_not_written() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "memory", "lots"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value for 'memory'"));
    minicluster(&home)
        .args(["config", "get", "memory"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn timeout_must_be_positive() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "timeout", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("timeout must be > 0"));
    minicluster(&home)
        .args(["config", "set", "timeout", "90"])
        .assert()
        .success();
    minicluster(&home)
        .args(["config", "get", "timeout"])
        .assert()
        .success()
        .stdout("90\n");
}

// =============================================================================
// image
// =============================================================================

#[test]
fn image_list_on_empty_cache_prints_nothing() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["image", "list"])
        .assert()
        .success()
        .stdout("");
}

#[test]
fn image_delete_updates_cache_images() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["config", "set", "cache-images", "alpine,busybox:1.36"])
        .assert()
        .success();
    minicluster(&home)
        .args(["image", "delete", "alpine:latest"])
        .assert()
        .success();
    minicluster(&home)
        .args(["config", "get", "cache-images"])
        .assert()
        .success()
        .stdout("[busybox:1.36]\n");
}

#[test]
fn image_delete_rejects_invalid_names() {
    let home = TempDir::new().unwrap();
    minicluster(&home)
        .args(["image", "delete", "Not A Name"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error parsing image name 'Not A Name'"));
}
