//! Integration tests for the capsy CLI

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Helper to get the capsy binary path
fn capsy_bin() -> PathBuf {
    let mut path = std::env::current_exe().expect("Failed to get current exe");
    path.pop(); // Remove test binary name
    path.pop(); // Remove deps directory
    path.push("capsy");
    path
}

/// Helper to run capsy in a directory
fn run_capsy(dir: &Path, args: &[&str]) -> Result<std::process::Output> {
    Ok(Command::new(capsy_bin())
        .args(args)
        .current_dir(dir)
        .output()?)
}

/// Helper to run capsy with extra environment variables
fn run_capsy_env(
    dir: &Path,
    args: &[&str],
    env: &[(&str, &str)],
) -> Result<std::process::Output> {
    let mut cmd = Command::new(capsy_bin());
    cmd.args(args).current_dir(dir);
    for (key, value) in env {
        cmd.env(key, value);
    }
    Ok(cmd.output()?)
}

/// Short prefix of the current HEAD digest, for reference resolution
fn head_prefix(root: &Path) -> Result<String> {
    let head = fs::read_to_string(root.join(".capsy/HEAD"))?;
    Ok(head.trim()[..8].to_string())
}

#[test]
fn test_init_creates_capsy_directory() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    let output = run_capsy(root, &["init"])?;
    assert!(output.status.success(), "capsy init failed");

    assert!(root.join(".capsy").exists());
    assert!(root.join(".capsy/objects/blobs").exists());
    assert!(root.join(".capsy/objects/trees").exists());
    assert!(root.join(".capsy/snapshots").exists());
    assert!(root.join(".capsy/config.toml").exists());
    assert!(root.join(".capsy/HEAD").exists());
    Ok(())
}

#[test]
fn test_init_twice_exits_3() -> Result<()> {
    let temp = TempDir::new()?;

    run_capsy(temp.path(), &["init"])?;
    let output = run_capsy(temp.path(), &["init"])?;

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("already initialized"));
    Ok(())
}

#[test]
fn test_status_outside_repo_exits_4() -> Result<()> {
    let temp = TempDir::new()?;
    let output = run_capsy(temp.path(), &["status"])?;
    assert_eq!(output.status.code(), Some(4));
    Ok(())
}

#[test]
fn test_cp_and_status() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;

    let output = run_capsy(root, &["cp", "first", "snapshot"])?;
    assert!(output.status.success(), "capsy cp failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Captured"));
    assert!(stdout.contains("first snapshot"));

    let output = run_capsy(root, &["status"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Working tree clean"));
    Ok(())
}

#[test]
fn test_cp_without_changes_exits_6() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;
    run_capsy(root, &["cp", "first"])?;

    let output = run_capsy(root, &["cp", "again"])?;
    assert_eq!(output.status.code(), Some(6));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nothing to commit"));
    Ok(())
}

#[test]
fn test_day_commits_marker_without_changes() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;
    run_capsy(root, &["cp", "work"])?;

    // Unlike cp, day succeeds with an unchanged working tree
    let output = run_capsy(root, &["day", "wrapped", "up"])?;
    assert!(output.status.success(), "capsy day failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Logged"));
    assert!(stdout.contains("wrapped up"));

    let output = run_capsy(root, &["log"])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[endday] wrapped up"));
    assert!(stdout.contains("work"));
    Ok(())
}

#[test]
fn test_debug_logging_via_rust_log() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;

    let output = run_capsy_env(root, &["status"], &[("RUST_LOG", "debug")])?;
    assert!(output.status.success());

    let combined = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(combined.contains("computed working-tree status"));
    Ok(())
}

#[test]
fn test_status_lists_changes() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;
    run_capsy(root, &["cp", "first"])?;

    fs::write(root.join("a.txt"), b"hello world")?;
    fs::write(root.join("new.txt"), b"fresh")?;

    let output = run_capsy(root, &["status"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("a.txt"));
    assert!(stdout.contains("new.txt"));
    assert!(stdout.contains("modified"));
    assert!(stdout.contains("added"));
    Ok(())
}

#[test]
fn test_log_newest_first() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"one")?;
    run_capsy(root, &["cp", "first"])?;
    fs::write(root.join("a.txt"), b"two")?;
    run_capsy(root, &["cp", "second"])?;

    let output = run_capsy(root, &["log"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    let first_pos = stdout.find("first").expect("first in log");
    let second_pos = stdout.find("second").expect("second in log");
    assert!(second_pos < first_pos, "log should be newest first");
    Ok(())
}

#[test]
fn test_log_empty_repo() -> Result<()> {
    let temp = TempDir::new()?;
    run_capsy(temp.path(), &["init"])?;

    let output = run_capsy(temp.path(), &["log"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("No snapshots yet"));
    Ok(())
}

#[test]
fn test_restore_to_dest() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"hello")?;

    run_capsy(root, &["cp", "first"])?;
    let prefix = head_prefix(root)?;

    let dest = TempDir::new()?;
    let dest_arg = dest.path().to_string_lossy().to_string();
    let output = run_capsy(root, &["restore", &prefix, "--dest", &dest_arg])?;
    assert!(output.status.success(), "capsy restore failed");

    assert_eq!(fs::read(dest.path().join("a.txt"))?, b"hello");
    Ok(())
}

#[test]
fn test_restore_unknown_snapshot_exits_2() -> Result<()> {
    let temp = TempDir::new()?;
    run_capsy(temp.path(), &["init"])?;

    let bogus = "0".repeat(64);
    let output = run_capsy(temp.path(), &["restore", &bogus, "-y"])?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn test_restore_unknown_prefix_exits_2() -> Result<()> {
    // Prefix references share the NotFound exit code with full digests
    let temp = TempDir::new()?;
    run_capsy(temp.path(), &["init"])?;

    let output = run_capsy(temp.path(), &["restore", "0123abcd", "-y"])?;
    assert_eq!(output.status.code(), Some(2));

    let output = run_capsy(temp.path(), &["restore", "not-a-ref", "-y"])?;
    assert_eq!(output.status.code(), Some(2));
    Ok(())
}

#[test]
fn test_restore_in_place_with_yes() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::write(root.join("a.txt"), b"original")?;
    run_capsy(root, &["cp", "first"])?;
    let prefix = head_prefix(root)?;

    fs::write(root.join("a.txt"), b"scribbled over")?;

    let output = run_capsy(root, &["restore", &prefix, "-y"])?;
    assert!(output.status.success(), "in-place restore failed");
    assert_eq!(fs::read(root.join("a.txt"))?, b"original");
    Ok(())
}

#[test]
fn test_subdirectory_finds_repo_root() -> Result<()> {
    let temp = TempDir::new()?;
    let root = temp.path();

    run_capsy(root, &["init"])?;
    fs::create_dir(root.join("sub"))?;
    fs::write(root.join("sub/file.txt"), b"nested")?;

    // Commands run from a subdirectory still operate on the repo root
    let output = run_capsy(&root.join("sub"), &["cp", "from", "subdir"])?;
    assert!(output.status.success());

    let output = run_capsy(&root.join("sub"), &["status"])?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Working tree clean"));
    Ok(())
}
