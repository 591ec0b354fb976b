//! Integration tests for the `safeattest` binary.
//!
//! These invoke the compiled binary end-to-end against a temporary sandbox
//! and check stdout, exit codes, and the attestation files it writes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const HELLO_SHA256: &str =
    "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn safeattest_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_safeattest"))
}

/// `<tmp>/sandbox/dist/app.bin` containing `hello`.
fn create_sandbox() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("sandbox");
    fs::create_dir_all(root.join("dist")).unwrap();
    fs::write(root.join("dist").join("app.bin"), b"hello").unwrap();
    (dir, root)
}

fn run(root: &Path, args: &[&str]) -> Output {
    Command::new(safeattest_bin())
        .arg("--sandbox-root")
        .arg(root)
        .args(args)
        .env_remove("SAFE_ROOT")
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to execute safeattest")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn attest_to(root: &Path, out: &Path) -> Output {
    run(
        root,
        &[
            "attest",
            "dist/app.bin",
            "--builder-id",
            "https://ci.example.com/runner",
            "--builder-version",
            "1.0",
            "--out",
            out.to_str().unwrap(),
        ],
    )
}

// -------------------------------------------------------------------------
// Happy-path tests
// -------------------------------------------------------------------------

#[test]
fn resolve_prints_sandbox_relative_path() {
    let (_dir, root) = create_sandbox();
    let output = run(&root, &["resolve", "dist/app.bin"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "dist/app.bin");
}

#[test]
fn digest_prints_prefixed_sha256() {
    let (_dir, root) = create_sandbox();
    let output = run(&root, &["digest", "dist/app.bin"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), HELLO_SHA256);
}

#[test]
fn attest_to_stdout_emits_json_record() {
    let (_dir, root) = create_sandbox();
    let output = run(
        &root,
        &[
            "attest",
            "dist/app.bin",
            "--builder-id",
            "b",
            "--builder-version",
            "1",
            "--recipe-type",
            "https://example.com/recipe/v1",
            "--entry-point",
            "make dist",
            "--invocation-id",
            "inv-42",
            "--reproducible",
            "--material",
            &format!("git+https://example.com/repo={HELLO_SHA256}"),
        ],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let record: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(record["id"].as_str().unwrap().starts_with("att_"));
    assert_eq!(record["subject"]["digest"], HELLO_SHA256);
    assert_eq!(record["subject"]["path"], "dist/app.bin");
    assert_eq!(record["predicate"]["type"], "https://slsa.dev/provenance/v1");
    assert_eq!(record["predicate"]["recipe"]["entryPoint"], "make dist");
    assert_eq!(record["predicate"]["metadata"]["reproducible"], true);
    assert_eq!(record["predicate"]["metadata"]["buildInvocationId"], "inv-42");
    assert_eq!(
        record["predicate"]["materials"][0]["uri"],
        "git+https://example.com/repo"
    );
    assert_eq!(
        record["slsaProvenance"]["_type"],
        "https://in-toto.io/Statement/v1"
    );
}

#[test]
fn entry_point_alone_uses_default_recipe_type() {
    let (_dir, root) = create_sandbox();
    let output = run(
        &root,
        &[
            "attest",
            "dist/app.bin",
            "--builder-id",
            "b",
            "--builder-version",
            "1",
            "--entry-point",
            "make dist",
        ],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let record: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let recipe = &record["predicate"]["recipe"];
    assert_eq!(recipe["entryPoint"], "make dist");
    assert_eq!(recipe["type"], "https://safeattest.dev/recipe/file/v1");
    assert_eq!(
        record["slsaProvenance"]["predicate"]["buildDefinition"]["externalParameters"]
            ["entryPoint"],
        "make dist"
    );
}

#[test]
fn attest_then_verify_succeeds() {
    let (dir, root) = create_sandbox();
    let out = dir.path().join("app.att.json");

    let output = attest_to(&root, &out);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(out.exists(), "attestation file should be written");
    assert!(stdout(&output).contains(HELLO_SHA256));

    let output = run(&root, &["verify", out.to_str().unwrap()]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("verified"));
}

#[test]
fn sandbox_root_from_environment() {
    let (_dir, root) = create_sandbox();
    let output = Command::new(safeattest_bin())
        .args(["digest", "dist/app.bin"])
        .env("SAFE_ROOT", &root)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), HELLO_SHA256);
}

#[test]
fn sandbox_root_from_config_file() {
    let (dir, root) = create_sandbox();
    let config = dir.path().join("safeattest.json");
    fs::write(
        &config,
        serde_json::json!({ "sandbox_root": root }).to_string(),
    )
    .unwrap();

    let output = Command::new(safeattest_bin())
        .arg("--config")
        .arg(&config)
        .args(["resolve", "dist/app.bin"])
        .env_remove("SAFE_ROOT")
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "dist/app.bin");
}

// -------------------------------------------------------------------------
// Failure-path tests
// -------------------------------------------------------------------------

#[test]
fn verify_fails_after_tamper() {
    let (dir, root) = create_sandbox();
    let out = dir.path().join("app.att.json");
    assert!(attest_to(&root, &out).status.success());

    fs::write(root.join("dist").join("app.bin"), b"hellO").unwrap();

    let output = run(&root, &["verify", out.to_str().unwrap()]);
    assert!(!output.status.success(), "tampered subject must fail");
    assert!(stderr(&output).contains("does not match"));
}

#[test]
fn verify_rejects_malformed_document() {
    let (dir, root) = create_sandbox();
    let bad = dir.path().join("bad.json");
    fs::write(&bad, r#"{"timestamp": "2025-01-01T00:00:00Z"}"#).unwrap();

    let output = run(&root, &["verify", bad.to_str().unwrap()]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("missing field `id`"));
}

#[test]
fn traversal_is_rejected() {
    let (_dir, root) = create_sandbox();
    for args in [
        ["resolve", "../sandbox/dist/app.bin"],
        ["digest", "dist/../../outside"],
    ] {
        let output = run(&root, &args);
        assert!(!output.status.success(), "{args:?} must fail");
        assert!(stderr(&output).contains("invalid path"), "{}", stderr(&output));
    }
}

#[test]
fn missing_file_reports_not_found() {
    let (_dir, root) = create_sandbox();
    let output = run(&root, &["digest", "dist/missing.bin"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not found"));
}

#[test]
fn root_itself_needs_opt_in() {
    let (_dir, root) = create_sandbox();
    let output = run(&root, &["resolve", "/"]);
    assert!(!output.status.success());

    let output = run(&root, &["--allow-root-itself", "resolve", "/"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
}

#[test]
fn attest_rejects_bad_material() {
    let (_dir, root) = create_sandbox();
    let output = run(
        &root,
        &[
            "attest",
            "dist/app.bin",
            "--builder-id",
            "b",
            "--builder-version",
            "1",
            "--material",
            "git+https://example.com/repo=md5:abc",
        ],
    );
    assert!(!output.status.success());
}
