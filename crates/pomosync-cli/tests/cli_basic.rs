//! Basic CLI E2E tests.
//!
//! Each test gets its own data directory, so the database and config file
//! start fresh.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command and return (exit code, stdout, stderr).
fn run_cli(data_dir: &Path, args: &[&str]) -> (i32, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_pomosync"))
        .args(args)
        .env("POMOSYNC_DATA_DIR", data_dir)
        .env("USER", "tester")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (code, stdout, stderr)
}

fn run_json(data_dir: &Path, args: &[&str]) -> serde_json::Value {
    let (code, stdout, stderr) = run_cli(data_dir, args);
    assert_eq!(code, 0, "{args:?} failed: {stderr}");
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("{args:?} printed non-JSON ({e}): {stdout}"))
}

#[test]
fn test_timer_status_of_fresh_record() {
    let dir = TempDir::new().unwrap();
    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["type"], "state_snapshot");
    assert_eq!(status["mode"], "work");
    assert_eq!(status["is_running"], false);
    assert_eq!(status["time_remaining"], 1500);
    assert_eq!(status["total"], 1500);
}

#[test]
fn test_timer_start_then_pause() {
    let dir = TempDir::new().unwrap();
    let started = run_json(dir.path(), &["timer", "start"]);
    assert_eq!(started["type"], "timer_started");

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["is_running"], true);

    let paused = run_json(dir.path(), &["timer", "pause"]);
    assert_eq!(paused["type"], "timer_paused");
    let remaining = paused["time_remaining"].as_u64().unwrap();
    assert!((1490..=1500).contains(&remaining), "remaining {remaining}");

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["is_running"], false);
    assert_eq!(status["time_remaining"].as_u64(), Some(remaining));
}

#[test]
fn test_timer_start_twice_prints_state() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["timer", "start"]);
    let again = run_json(dir.path(), &["timer", "start"]);
    assert_eq!(again["type"], "state_snapshot");
    assert_eq!(again["is_running"], true);
}

#[test]
fn test_timer_skip_rotates_mode() {
    let dir = TempDir::new().unwrap();
    let skipped = run_json(dir.path(), &["timer", "skip"]);
    assert_eq!(skipped["type"], "timer_skipped");
    assert_eq!(skipped["from"], "work");
    assert_eq!(skipped["to"], "shortBreak");
    assert_eq!(skipped["sessions_completed"], 1);

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["mode"], "shortBreak");
    assert_eq!(status["time_remaining"], 300);
}

#[test]
fn test_timer_mode_and_reset() {
    let dir = TempDir::new().unwrap();
    let changed = run_json(dir.path(), &["timer", "mode", "long-break"]);
    assert_eq!(changed["type"], "mode_changed");
    assert_eq!(changed["mode"], "longBreak");
    assert_eq!(changed["time_remaining"], 900);

    let reset = run_json(dir.path(), &["timer", "reset"]);
    assert_eq!(reset["type"], "timer_reset");
    assert_eq!(reset["time_remaining"], 900);
}

#[test]
fn test_timer_mode_refused_while_running() {
    let dir = TempDir::new().unwrap();
    run_json(dir.path(), &["timer", "start"]);
    let (code, _, stderr) = run_cli(dir.path(), &["timer", "mode", "short-break"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("running"), "stderr: {stderr}");
}

#[test]
fn test_timer_unknown_mode_rejected() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["timer", "mode", "nap"]);
    assert_ne!(code, 0);
}

#[test]
fn test_timer_durations() {
    let dir = TempDir::new().unwrap();
    let updated = run_json(dir.path(), &["timer", "durations", "--work", "600"]);
    assert_eq!(updated["type"], "durations_updated");
    assert_eq!(updated["work"], 600);
    assert_eq!(updated["short_break"], 300);
    assert_eq!(updated["long_break"], 900);

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["time_remaining"], 600);
}

#[test]
fn test_timer_durations_rejects_non_positive() {
    let dir = TempDir::new().unwrap();
    let (code, _, stderr) = run_cli(dir.path(), &["timer", "durations", "--short-break", "0"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("must be positive"), "stderr: {stderr}");

    let (code, _, stderr) = run_cli(dir.path(), &["timer", "durations", "--work", "-5"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("must be positive"), "stderr: {stderr}");

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["time_remaining"], 1500);
}

#[test]
fn test_config_get_and_set() {
    let dir = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["config", "get", "schedule.focus_duration"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "25");

    let (code, stdout, _) = run_cli(dir.path(), &["config", "set", "sync.backend", "memory"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "ok");

    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "sync.backend"]);
    assert_eq!(stdout.trim(), "memory");
}

#[test]
fn test_config_rejects_bad_values() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "schedule.focus_duration", "0"]);
    assert_eq!(code, 1);
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "no.such_key", "1"]);
    assert_eq!(code, 1);
    let (code, _, stderr) = run_cli(dir.path(), &["config", "get", "no.such_key"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"), "stderr: {stderr}");
}

#[test]
fn test_config_list_path_and_reset() {
    let dir = TempDir::new().unwrap();
    let (code, stdout, _) = run_cli(dir.path(), &["config", "list"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("schedule.focus_duration = 25"));
    assert!(stdout.contains("sync.local_wins_while_running = true"));

    let (code, stdout, _) = run_cli(dir.path(), &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().ends_with("config.toml"));
    assert!(Path::new(stdout.trim()).starts_with(dir.path()));

    run_cli(dir.path(), &["config", "set", "schedule.long_break", "30"]);
    let (code, _, _) = run_cli(dir.path(), &["config", "reset"]);
    assert_eq!(code, 0);
    let (_, stdout, _) = run_cli(dir.path(), &["config", "get", "schedule.long_break"]);
    assert_eq!(stdout.trim(), "15");
}

#[test]
fn test_config_durations_seed_new_records() {
    let dir = TempDir::new().unwrap();
    let (code, _, _) = run_cli(dir.path(), &["config", "set", "schedule.focus_duration", "50"]);
    assert_eq!(code, 0);

    let status = run_json(dir.path(), &["timer", "status"]);
    assert_eq!(status["time_remaining"], 3000);
}
