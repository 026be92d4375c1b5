use cvr_common::testing::TarballBuilder;

use crate::common::{CliEnv, assert_contains, assert_path_exists, init_test_logging};

fn write_archive(env: &CliEnv, name: &str, bytes: Vec<u8>) -> std::path::PathBuf {
    let path = env.path().join(name);
    std::fs::write(&path, bytes).expect("Failed to write archive");
    path
}

#[test]
fn test_cvr_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_cvr_help_includes_description");

    let output = CliEnv::new().run(&["--help"]);

    assert!(output.status.success(), "cvr --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "Commit Verification Runner");
    assert_contains(&stdout, "check");
    assert_contains(&stdout, "poll");
    crate::test_log!("TEST PASS: test_cvr_help_includes_description");
}

#[test]
fn test_extract_builds_tree() {
    init_test_logging();
    crate::test_log!("TEST START: test_extract_builds_tree");

    let env = CliEnv::new();
    let archive = TarballBuilder::new()
        .pax_global_header("0123456789abcdef0123456789abcdef01234567")
        .dir("proj-0123456/", 0o755)
        .dir("proj-0123456/src/", 0o755)
        .file("proj-0123456/run.sh", 0o755, b"#!/bin/sh\nexit 0\n")
        .file("proj-0123456/src/lib.txt", 0o644, b"hello\n")
        .into_gzip();
    let archive = write_archive(&env, "snapshot.tar.gz", archive);
    let dest = env.path().join("out");

    let output = env.run(&[
        "extract",
        "--archive",
        archive.to_str().unwrap(),
        "--dest",
        dest.to_str().unwrap(),
    ]);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "extract failed: {stderr}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "extracted");
    assert_contains(&stdout, "2 files");
    assert_path_exists(&dest.join("proj-0123456/run.sh"));
    assert_eq!(
        std::fs::read_to_string(dest.join("proj-0123456/src/lib.txt")).unwrap(),
        "hello\n"
    );
    assert!(!dest.join("pax_global_header").exists());
    crate::test_log!("TEST PASS: test_extract_builds_tree");
}

#[test]
fn test_extract_json_reports_snapshot() {
    init_test_logging();
    crate::test_log!("TEST START: test_extract_json_reports_snapshot");

    let env = CliEnv::new();
    let archive = TarballBuilder::new()
        .dir("proj/", 0o755)
        .file("proj/a.txt", 0o644, b"abc")
        .into_tar();
    let archive = write_archive(&env, "snapshot.tar", archive);
    let dest = env.path().join("out");

    let output = env.run(&[
        "--json",
        "extract",
        "--archive",
        archive.to_str().unwrap(),
        "--dest",
        dest.to_str().unwrap(),
    ]);

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(report["files"], 1);
    assert_eq!(report["bytes_written"], 3);
    assert_eq!(report["top_level"], "proj");
    crate::test_log!("TEST PASS: test_extract_json_reports_snapshot");
}

#[test]
fn test_extract_rejects_traversal() {
    init_test_logging();
    crate::test_log!("TEST START: test_extract_rejects_traversal");

    let env = CliEnv::new();
    let archive = TarballBuilder::new()
        .dir("proj/", 0o755)
        .raw_file(b"proj/../../evil.txt", 0o644, b"pwned")
        .into_gzip();
    let archive = write_archive(&env, "hostile.tar.gz", archive);
    let dest = env.path().join("nested").join("out");

    let output = env.run(&[
        "extract",
        "--archive",
        archive.to_str().unwrap(),
        "--dest",
        dest.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "CVR-E200");
    assert!(!env.path().join("nested").join("evil.txt").exists());
    assert!(!env.path().join("evil.txt").exists());
    crate::test_log!("TEST PASS: test_extract_rejects_traversal");
}

#[test]
fn test_extract_rejects_non_gzip() {
    init_test_logging();
    crate::test_log!("TEST START: test_extract_rejects_non_gzip");

    let env = CliEnv::new();
    let archive = write_archive(&env, "page.tar.gz", b"<html>not found</html>".to_vec());
    let dest = env.path().join("out");

    let output = env.run(&[
        "extract",
        "--archive",
        archive.to_str().unwrap(),
        "--dest",
        dest.to_str().unwrap(),
    ]);

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "CVR-E103");
    crate::test_log!("TEST PASS: test_extract_rejects_non_gzip");
}

#[test]
fn test_check_requires_token() {
    init_test_logging();
    crate::test_log!("TEST START: test_check_requires_token");

    let output = CliEnv::new().run(&["check", "--owner", "acme", "--repo", "widgets", "--ref", "main"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "CVR-E005");
    crate::test_log!("TEST PASS: test_check_requires_token");
}

#[test]
fn test_poll_rejects_out_of_range_page_size() {
    init_test_logging();
    crate::test_log!("TEST START: test_poll_rejects_out_of_range_page_size");

    let output = CliEnv::new().run(&[
        "poll",
        "--owner",
        "acme",
        "--repo",
        "widgets",
        "--page-size",
        "101",
    ]);

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "page-size");
    crate::test_log!("TEST PASS: test_poll_rejects_out_of_range_page_size");
}

#[test]
fn test_explain_known_code() {
    init_test_logging();
    crate::test_log!("TEST START: test_explain_known_code");

    let output = CliEnv::new().run(&["explain", "cvr-e200"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "[CVR-E200]");
    assert_contains(&stdout, "Remediation steps:");
    crate::test_log!("TEST PASS: test_explain_known_code");
}

#[test]
fn test_explain_lists_all_codes() {
    init_test_logging();
    crate::test_log!("TEST START: test_explain_lists_all_codes");

    let output = CliEnv::new().run(&["explain"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "CVR-E001");
    assert_contains(&stdout, "CVR-E104");
    assert_contains(&stdout, "CVR-E501");
    crate::test_log!("TEST PASS: test_explain_lists_all_codes");
}

#[test]
fn test_explain_unknown_code_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_explain_unknown_code_fails");

    let output = CliEnv::new().run(&["explain", "CVR-E999"]);

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "unknown error code");
    crate::test_log!("TEST PASS: test_explain_unknown_code_fails");
}
