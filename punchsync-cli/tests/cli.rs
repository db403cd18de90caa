use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

// Nothing listens on the discard port, so collector health checks fail fast.
const UNREACHABLE_API: &str = "http://127.0.0.1:9/attendance";

fn punchsync_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("punchsync"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("ATTENDANCE_API_URL", UNREACHABLE_API)
        .env_remove("ATTENDANCE_DRIVER")
        .env_remove("ATTENDANCE_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn cursor_file(home: &Path, identity: &str) -> std::path::PathBuf {
    home.join(".punchsync")
        .join("cursors")
        .join(format!("last-sync-{identity}.txt"))
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

#[test]
fn sync_with_null_device_reports_no_records() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["sync", "--driver", "null"])
        .assert()
        .success()
        .stdout(contains("No attendance records found on device"))
        .stdout(contains("Total Records"));
}

#[test]
fn sync_test_mode_always_succeeds() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["sync", "--driver", "null", "--test"])
        .assert()
        .success()
        .stdout(contains("Attendance device connection successful"))
        .stdout(contains("Device info:"))
        .stderr(contains("Remote API connection failed"));
}

#[test]
fn sync_rejects_unknown_device() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["sync", "--driver", "front-door"])
        .assert()
        .failure()
        .stderr(contains("attendance device [front-door] is not configured"));
}

#[test]
fn sync_rejects_invalid_env_override() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .env("ATTENDANCE_SYNC_BATCH_SIZE", "lots")
        .args(["sync", "--driver", "null"])
        .assert()
        .failure()
        .stderr(contains("ATTENDANCE_SYNC_BATCH_SIZE"));
}

// ---------------------------------------------------------------------------
// watch
// ---------------------------------------------------------------------------

#[test]
fn watch_test_mode_fails_when_collector_unreachable() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["watch", "--driver", "null", "--test"])
        .assert()
        .failure()
        .stdout(contains("Connected to attendance device"))
        .stderr(contains("remote API unreachable"));

    assert!(
        !cursor_file(home.path(), "null").exists(),
        "test mode must not touch the cursor"
    );
}

#[test]
fn watch_rejects_zero_interval() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["watch", "--driver", "null", "--interval", "0"])
        .assert()
        .failure()
        .stderr(contains("sync.interval_secs"));
}

// ---------------------------------------------------------------------------
// cursor
// ---------------------------------------------------------------------------

#[test]
fn cursor_set_show_clear() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["cursor", "set", "null", "1700000000"])
        .assert()
        .success();
    let stored = fs::read_to_string(cursor_file(home.path(), "null")).expect("cursor file");
    assert_eq!(stored.trim(), "1700000000");

    punchsync_cmd(home.path())
        .args(["cursor", "show"])
        .assert()
        .success()
        .stdout(contains("1700000000"))
        .stdout(contains("database"))
        .stdout(contains("terminal"));

    punchsync_cmd(home.path())
        .args(["cursor", "clear", "null"])
        .assert()
        .success()
        .stdout(contains("cleared"));
    assert!(!cursor_file(home.path(), "null").exists());

    punchsync_cmd(home.path())
        .args(["cursor", "clear", "null"])
        .assert()
        .success()
        .stdout(contains("No cursor stored"));
}

#[test]
fn cursor_set_rejects_garbage() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .args(["cursor", "set", "null", "last tuesday"])
        .assert()
        .failure()
        .stderr(contains("invalid cursor"));
    assert!(!cursor_file(home.path(), "null").exists());
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[test]
fn config_init_refuses_to_overwrite_without_force() {
    let home = TempDir::new().expect("home");
    let path = home.path().join(".punchsync").join("config.yaml");

    punchsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .success();
    let written = fs::read_to_string(&path).expect("config written");
    assert!(written.contains("remote_api"));

    fs::write(&path, "debug: true\n").expect("edit config");
    punchsync_cmd(home.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(contains("--force"));
    assert_eq!(fs::read_to_string(&path).unwrap(), "debug: true\n");

    punchsync_cmd(home.path())
        .args(["config", "init", "--force"])
        .assert()
        .success();
    assert!(fs::read_to_string(&path).unwrap().contains("devices"));
}

#[test]
fn config_show_masks_api_key() {
    let home = TempDir::new().expect("home");

    punchsync_cmd(home.path())
        .env("ATTENDANCE_API_KEY", "sk-live-123456")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(contains(UNREACHABLE_API))
        .stdout(contains("3456"))
        .stdout(contains("sk-live").not());
}
