//! Integration tests for the checkride CLI
//!
//! These exercise the binary end-to-end against a temporary database.
//! Generation commands run without an API key, so `generate` lands on the
//! built-in fallback scenario; commands that require a model response
//! (`evaluate`, `report`) are tested for their failure behavior only.

use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

/// Run checkride with a specific database path
fn run_checkride(args: &[&str], db_path: &PathBuf) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_checkride"))
        .args(args)
        .env("CHECKRIDE_DB_PATH", db_path)
        .env_remove("CHECKRIDE_API_KEY")
        .output()
        .expect("Failed to execute checkride")
}

fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn temp_db() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("checkride.db");
    (dir, path)
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_checkride"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("checkride"));
    assert!(out.contains("scenario"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_checkride"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("checkride"));
}

#[test]
fn test_init_creates_database() {
    let (_dir, db_path) = temp_db();
    let output = run_checkride(&["init"], &db_path);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Database ready"));
    assert!(db_path.exists());
}

#[test]
fn test_list_empty() {
    let (_dir, db_path) = temp_db();
    let output = run_checkride(&["list"], &db_path);

    assert!(output.status.success());
    assert!(stdout(&output).contains("No scenarios"));
}

// =============================================================================
// Scenario Lifecycle
// =============================================================================

#[test]
fn test_generate_falls_back_without_api_key() {
    let (_dir, db_path) = temp_db();
    let output = run_checkride(&["generate", "crosswind landing practice"], &db_path);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("fell back"));
    assert!(out.contains("crosswind landing practice"));
}

#[test]
fn test_generate_then_list_and_show() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate", "hydraulic failure enroute"], &db_path);

    let list = run_checkride(&["list"], &db_path);
    assert!(list.status.success());
    assert!(stdout(&list).contains("hydraulic failure enroute"));
    assert!(stdout(&list).contains("[1]"));

    let show = run_checkride(&["show", "1"], &db_path);
    assert!(show.status.success());
    let out = stdout(&show);
    assert!(out.contains("KJFK"));
    assert!(out.contains("Waypoints:"));
    assert!(out.contains("Decisions:"));
}

#[test]
fn test_show_missing_scenario_fails() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["init"], &db_path);

    let output = run_checkride(&["show", "99"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not found"));
}

#[test]
fn test_activate_tick_state_flow() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);

    let activate = run_checkride(&["activate", "1"], &db_path);
    assert!(activate.status.success(), "stderr: {}", stderr(&activate));

    // Before any tick the seeded state is pristine
    let state = run_checkride(&["state", "1"], &db_path);
    assert!(state.status.success());
    assert!(stdout(&state).contains("safety 100"));

    let tick = run_checkride(&["tick", "1", "60"], &db_path);
    assert!(tick.status.success(), "stderr: {}", stderr(&tick));
    assert!(stdout(&tick).contains("t=60.0s"));

    // Fallback scenario has one ATC call due at 45s
    assert!(stdout(&tick).contains("communications sent: 1"));
}

#[test]
fn test_tick_without_activation_is_noop() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);

    let tick = run_checkride(&["tick", "1", "5"], &db_path);
    assert!(tick.status.success());
    assert!(stdout(&tick).contains("did not advance"));
}

#[test]
fn test_deactivate() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);
    run_checkride(&["activate", "1"], &db_path);

    let output = run_checkride(&["deactivate", "1"], &db_path);
    assert!(output.status.success());
    assert!(stdout(&output).contains("deactivated"));
}

#[test]
fn test_adapt_records_suggestion() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);
    run_checkride(&["activate", "1"], &db_path);

    let output = run_checkride(&["adapt", "1"], &db_path);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    // Fresh 100/100/100 scores with a moderate weather cell -> raise difficulty
    assert!(stdout(&output).contains("increase"));
}

#[test]
fn test_adapt_without_state_fails() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);

    let output = run_checkride(&["adapt", "1"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Not found"));
}

// =============================================================================
// Commands that need a model response
// =============================================================================

#[test]
fn test_evaluate_without_api_key_fails_cleanly() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);
    run_checkride(&["activate", "1"], &db_path);

    let output = run_checkride(&["evaluate", "1"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("API key"));
}

#[test]
fn test_report_without_evaluation_fails() {
    let (_dir, db_path) = temp_db();
    run_checkride(&["generate"], &db_path);
    run_checkride(&["activate", "1"], &db_path);

    let output = run_checkride(&["report", "1"], &db_path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("evaluation"));
}
