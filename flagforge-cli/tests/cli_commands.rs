// flagforge-cli/tests/cli_commands.rs
// ============================================================================
// Module: CLI Command Tests
// Description: Integration tests for config docs and key administration.
// Purpose: Validate CLI wiring end-to-end by running the built binary.
// Dependencies: flagforge-cli binary
// ============================================================================

//! ## Overview
//! Runs the CLI binary against temporary config files and a scratch SQLite
//! database, asserting on exit codes and stdout content.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn flagforge_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_flagforge"))
}

fn temp_root(label: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock drift").as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("flagforge-cli-{label}-{nanos}"));
    fs::create_dir_all(&path).expect("create temp dir");
    path
}

fn cleanup(path: &PathBuf) {
    let _ = fs::remove_dir_all(path);
}

// ============================================================================
// SECTION: Config Docs
// ============================================================================

#[test]
fn config_docs_prints_markdown_to_stdout() {
    let output = Command::new(flagforge_bin()).args(["config", "docs"]).output().expect("config docs");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("# flagforge.toml reference"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("## [edge]"), "unexpected stdout: {stdout}");
}

#[test]
fn config_docs_writes_to_a_file() {
    let root = temp_root("config-docs");
    let out_path = root.join("CONFIG.md");

    let output = Command::new(flagforge_bin())
        .args(["config", "docs", "--output", out_path.to_string_lossy().as_ref()])
        .output()
        .expect("config docs --output");

    assert!(output.status.success());
    let written = fs::read_to_string(&out_path).expect("read generated docs");
    assert!(written.contains("`hub_url`"), "unexpected docs: {written}");

    cleanup(&root);
}

// ============================================================================
// SECTION: Keys Create
// ============================================================================

#[test]
fn keys_create_prints_the_plaintext_once() {
    let root = temp_root("keys-create");
    let db_path = root.join("flagforge.sqlite3");
    let config_path = root.join("flagforge.toml");
    fs::write(&config_path, format!("[store]\npath = {:?}\n", db_path.to_string_lossy())).expect("write config");

    let output = Command::new(flagforge_bin())
        .args([
            "keys",
            "create",
            "--config",
            config_path.to_string_lossy().as_ref(),
            "--project",
            "acme",
            "--env",
            "prod",
            "--permissions",
            "read,evaluate",
        ])
        .output()
        .expect("keys create");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("created api key"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("plaintext (shown once):"), "unexpected stdout: {stdout}");

    cleanup(&root);
}

#[test]
fn keys_create_rejects_an_unreachable_store_directory() {
    let root = temp_root("keys-create-bad");
    let config_path = root.join("flagforge.toml");
    let bad_db_path = root.join("does-not-exist").join("flagforge.sqlite3");
    fs::write(&config_path, format!("[store]\npath = {:?}\n", bad_db_path.to_string_lossy())).expect("write config");

    let output = Command::new(flagforge_bin())
        .args([
            "keys",
            "create",
            "--config",
            config_path.to_string_lossy().as_ref(),
            "--project",
            "acme",
            "--env",
            "prod",
            "--permissions",
            "read",
        ])
        .output()
        .expect("keys create");

    assert_eq!(output.status.code(), Some(2), "expected exit code 2 for an unreachable store");

    cleanup(&root);
}
