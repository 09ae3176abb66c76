//! Integration tests for the `iacforge` CLI binary.
//!
//! These run the CLI as a subprocess and check exit codes and output. They
//! do not need a running server; commands that would contact one point at a
//! closed port and must fail cleanly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Command;

const DEAD_ADDR: &str = "http://127.0.0.1:19999";

fn iacforge_bin() -> String {
    let path = env!("CARGO_BIN_EXE_iacforge");
    assert!(
        Path::new(path).exists(),
        "iacforge binary not found at {path}"
    );
    path.to_owned()
}

/// Run iacforge with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(iacforge_bin())
        .args(args)
        .env("IACFORGE_ADDR", DEAD_ADDR)
        .env_remove("AWS_ACCESS_KEY_ID")
        .env_remove("AWS_SECRET_ACCESS_KEY")
        .env_remove("AWS_SESSION_TOKEN")
        .output()
        .expect("failed to execute iacforge");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("iacforge"), "version output: {stdout}");
}

#[test]
fn test_help_lists_commands() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0);
    for command in [
        "status",
        "generate",
        "convert",
        "check",
        "analyze",
        "job",
        "artifact",
        "credentials",
        "standards",
    ] {
        assert!(stdout.contains(command), "help should list '{command}'");
    }
    assert!(stdout.contains("IACFORGE_ADDR"));
}

#[test]
fn test_subcommand_help() {
    for sub in ["job", "artifact", "credentials"] {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "{sub} --help should exit 0");
        assert!(stdout.contains("Usage"), "{sub} help: {stdout}");
    }
    let (_, stdout, _) = run(&["job", "--help"]);
    for action in ["show", "wait", "cancel", "list"] {
        assert!(stdout.contains(action), "job help should list '{action}'");
    }
}

// ── Argument validation ──────────────────────────────────────────────

#[test]
fn test_generate_requires_description() {
    let (code, _, stderr) = run(&["generate"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("required"), "stderr: {stderr}");
}

#[test]
fn test_unknown_target_is_rejected() {
    let (code, _, stderr) = run(&["generate", "a vpc", "--target", "yaml"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("yaml"), "stderr: {stderr}");
}

#[test]
fn test_connect_requires_keys() {
    let (code, _, stderr) = run(&["credentials", "connect"]);
    assert_ne!(code, 0);
    assert!(
        stderr.contains("access-key-id") || stderr.contains("required"),
        "stderr: {stderr}"
    );
}

// ── Local file handling ──────────────────────────────────────────────

#[test]
fn test_check_missing_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let missing = dir.path().join("main.tf");
    let (code, _, stderr) = run(&["check", missing.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to read"), "stderr: {stderr}");
}

#[test]
fn test_upload_empty_file() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let empty = dir.path().join("diagram.png");
    fs::write(&empty, b"").unwrap();
    let (code, _, stderr) = run(&["artifact", "upload", empty.to_str().unwrap()]);
    assert_eq!(code, 1);
    assert!(stderr.contains("is empty"), "stderr: {stderr}");
}

// ── Server unreachable ───────────────────────────────────────────────

#[test]
fn test_status_unreachable_server() {
    let (code, _, stderr) = run(&["status"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("Error"), "stderr: {stderr}");
    assert!(stderr.contains("request failed"), "stderr: {stderr}");
}

#[test]
fn test_check_reads_file_before_contacting_server() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let file = dir.path().join("main.tf");
    fs::write(&file, "resource \"aws_s3_bucket\" \"logs\" {}\n").unwrap();
    let (code, _, stderr) = run(&["check", file.to_str().unwrap(), "--standard", "HIPAA"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("request failed"), "stderr: {stderr}");
}
