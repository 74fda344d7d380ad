//! Integration tests for the `tz` CLI.
//!
//! Each test creates a temp vault, runs `tz` as a subprocess, and verifies
//! stdout and/or note contents.

use std::fs;
use std::path::Path;
use std::process::Command;

use pretty_assertions::assert_eq;
use taskzero::model::Signifier;

/// Run `tz` with the given args in the given directory as replica `replica`,
/// returning (stdout, stderr, success).
fn run_tz_as(dir: &Path, replica: &str, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_tz"))
        .args(args)
        .current_dir(dir)
        .env("TZ_REPLICA_ID", replica)
        .env_remove("TZ_LOG")
        .output()
        .expect("failed to run tz");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_tz(dir: &Path, args: &[&str]) -> (String, String, bool) {
    run_tz_as(dir, "laptop", args)
}

/// Run `tz` expecting success, return stdout.
fn run_tz_ok(dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_tz(dir, args);
    if !success {
        panic!(
            "tz {:?} failed:\nstdout: {}\nstderr: {}",
            args, stdout, stderr
        );
    }
    stdout
}

fn read(dir: &Path, note: &str) -> String {
    fs::read_to_string(dir.join(note)).unwrap()
}

/// A fresh vault with the default config and an empty `Tasks.md`
fn create_test_vault() -> tempfile::TempDir {
    let tmp = tempfile::TempDir::new().unwrap();
    run_tz_ok(tmp.path(), &["init"]);
    tmp
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

#[test]
fn test_init_creates_config_and_note() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = run_tz_ok(tmp.path(), &["init"]);
    assert!(out.contains("Initialized taskzero vault"));
    assert!(tmp.path().join(".taskzero/config.toml").is_file());
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n");
}

#[test]
fn test_init_twice_fails_without_force() {
    let tmp = create_test_vault();
    let (_stdout, stderr, success) = run_tz(tmp.path(), &["init"]);
    assert!(!success);
    assert!(stderr.contains("already exists"));
    run_tz_ok(tmp.path(), &["init", "--force"]);
}

#[test]
fn test_init_rejects_bad_prefix() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (_stdout, stderr, success) = run_tz(tmp.path(), &["init", "--prefix", "my-tasks"]);
    assert!(!success);
    assert!(stderr.contains("invalid anchor prefix"));
}

#[test]
fn test_outside_a_vault_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (_stdout, stderr, success) = run_tz(tmp.path(), &["list"]);
    assert!(!success);
    assert!(stderr.contains("error: not a taskzero vault"));
}

// ---------------------------------------------------------------------------
// Capture and views
// ---------------------------------------------------------------------------

#[test]
fn test_add_appends_to_default_note() {
    let tmp = create_test_vault();
    let out = run_tz_ok(tmp.path(), &["add", "Buy milk"]);
    assert!(out.starts_with("added [ ]    1  Buy milk"));
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n- [ ] Buy milk ^tz1\n");

    // Bare `tz` shows the aggregated list
    let out = run_tz_ok(tmp.path(), &[]);
    assert!(out.contains("== Inbox =="));
    assert!(out.contains("Buy milk"));
}

#[test]
fn test_add_json_carries_type() {
    let tmp = create_test_vault();
    let out = run_tz_ok(tmp.path(), &["add", "Call Ann #waiting-on", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["id"], 1);
    assert_eq!(parsed["type"], "waiting-on");
    assert_eq!(parsed["text"], "Call Ann");
    assert_eq!(parsed["path"], "Tasks.md");
    assert_eq!(
        read(tmp.path(), "Tasks.md"),
        format!("# Tasks\n- [ ] {} Call Ann ^tz1\n", Signifier::WAITING_ON)
    );
}

#[test]
fn test_sync_sequences_a_project() {
    let tmp = create_test_vault();
    fs::write(
        tmp.path().join("Home.md"),
        "# Home\n- [ ] Renovate kitchen\n\t- [ ] Pick tiles\n\t- [ ] Order tiles\n",
    )
    .unwrap();

    let out = run_tz_ok(tmp.path(), &["sync"]);
    assert!(out.contains("Home.md: 3 new, rewritten"));
    assert_eq!(
        read(tmp.path(), "Home.md"),
        format!(
            "# Home\n- [ ] {} Renovate kitchen ^tz1\n\t- [ ] Pick tiles ^tz2\n\t- [ ] Order tiles ^tz3\n",
            Signifier::PROJECT
        )
    );

    let out = run_tz_ok(tmp.path(), &["list", "--type", "next-action", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    let arr = parsed.as_array().unwrap();
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["text"], "Pick tiles");
    assert_eq!(arr[0]["parent"], 1);

    // A second sync finds nothing to do
    let out = run_tz_ok(tmp.path(), &["sync", "Home.md"]);
    assert!(!out.contains("Home.md:"));
}

#[test]
fn test_show_with_hierarchy() {
    let tmp = create_test_vault();
    fs::write(tmp.path().join("Home.md"), "- [ ] Trip\n\t- [ ] Visa\n").unwrap();
    run_tz_ok(tmp.path(), &["sync"]);

    let out = run_tz_ok(tmp.path(), &["show", "2"]);
    assert!(out.contains("[ ] 2 Visa"));
    assert!(out.contains("type: next-action"));
    assert!(out.contains("note: Home.md:2"));
    assert!(out.contains("ancestors:"));

    let out = run_tz_ok(tmp.path(), &["show", "1", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["type"], "project");
    assert_eq!(parsed["descendants"][0]["id"], 2);
}

#[test]
fn test_show_not_found() {
    let tmp = create_test_vault();
    let (_stdout, stderr, success) = run_tz(tmp.path(), &["show", "99"]);
    assert!(!success);
    assert!(stderr.contains("task not found: 99"));
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

#[test]
fn test_done_writes_back() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Buy milk"]);

    let out = run_tz_ok(tmp.path(), &["done", "1"]);
    assert!(out.starts_with("done [x]"));
    let note = read(tmp.path(), "Tasks.md");
    assert!(note.contains("- [x] Buy milk ✅ "));
    assert!(note.trim_end().ends_with("^tz1"));

    let out = run_tz_ok(tmp.path(), &["done", "1"]);
    assert!(out.starts_with("already done"));

    run_tz_ok(tmp.path(), &["toggle", "1"]);
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n- [ ] Buy milk ^tz1\n");
}

#[test]
fn test_type_changes_the_line() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Learn the cello"]);
    run_tz_ok(tmp.path(), &["type", "1", "someday"]);
    assert_eq!(
        read(tmp.path(), "Tasks.md"),
        format!("# Tasks\n- [ ] {} Learn the cello ^tz1\n", Signifier::SOMEDAY)
    );

    let (_stdout, stderr, success) = run_tz(tmp.path(), &["type", "1", "later"]);
    assert!(!success);
    assert!(stderr.contains("unknown type"));
}

#[test]
fn test_sub_adds_indented_line() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Plan party"]);
    run_tz_ok(tmp.path(), &["sub", "1", "Send invites"]);
    assert_eq!(
        read(tmp.path(), "Tasks.md"),
        "# Tasks\n- [ ] Plan party ^tz1\n\t- [ ] Send invites ^tz2\n"
    );
}

#[test]
fn test_mv_to_another_note() {
    let tmp = create_test_vault();
    fs::write(tmp.path().join("B.md"), "# B\n").unwrap();
    run_tz_ok(tmp.path(), &["add", "Buy milk"]);

    let out = run_tz_ok(tmp.path(), &["mv", "1", "B.md"]);
    assert!(out.contains("moved 1 to B.md"));
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n");
    assert_eq!(read(tmp.path(), "B.md"), "# B\n- [ ] Buy milk ^tz1\n");

    let (_stdout, stderr, success) = run_tz(tmp.path(), &["mv", "1", "Nope.md"]);
    assert!(!success);
    assert!(stderr.contains("note not found"));
}

#[test]
fn test_archive_moves_completed() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Buy milk"]);
    run_tz_ok(tmp.path(), &["add", "Call Ann"]);
    run_tz_ok(tmp.path(), &["done", "1"]);

    let out = run_tz_ok(tmp.path(), &["archive"]);
    assert!(out.contains("archived 1 tasks from Tasks.md to Completed tasks.md"));
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n- [ ] Call Ann ^tz2\n");
    assert!(read(tmp.path(), "Completed tasks.md").contains("- [x] Buy milk"));
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

#[test]
fn test_check_valid_vault() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Buy milk"]);
    let out = run_tz_ok(tmp.path(), &["check"]);
    assert!(out.contains("✓ vault is valid"));
}

#[test]
fn test_check_reports_duplicate_anchor() {
    let tmp = create_test_vault();
    run_tz_ok(tmp.path(), &["add", "Buy milk"]);
    fs::write(
        tmp.path().join("Tasks.md"),
        "# Tasks\n- [ ] Buy milk ^tz1\n- [ ] Buy milk ^tz1\n",
    )
    .unwrap();

    let out = run_tz_ok(tmp.path(), &["check", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["valid"], false);
    assert_eq!(parsed["errors"][0]["type"], "duplicate_anchor");
}

#[test]
fn test_replica_claim_fences_other_replicas() {
    let tmp = create_test_vault();
    let out = run_tz_ok(tmp.path(), &["replica", "claim"]);
    assert!(out.contains("laptop is now the only replica that writes"));

    let out = run_tz_ok(tmp.path(), &["replica", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["self_id"], "laptop");
    assert_eq!(parsed["authoritative_id"], "laptop");
    assert_eq!(parsed["authoritative"], true);

    let (_stdout, stderr, success) = run_tz_as(tmp.path(), "desktop", &["add", "Buy milk"]);
    assert!(!success);
    assert!(stderr.contains("not authoritative"));
    assert_eq!(read(tmp.path(), "Tasks.md"), "# Tasks\n");

    // Reading still works everywhere
    run_tz_as(tmp.path(), "desktop", &["list"]);

    run_tz_ok(tmp.path(), &["replica", "release"]);
    let (_stdout, _stderr, success) = run_tz_as(tmp.path(), "desktop", &["add", "Buy milk"]);
    assert!(success);
}
