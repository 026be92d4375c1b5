use crate::common::{CliEnv, assert_contains, init_test_logging};

fn row<'a>(values: &'a serde_json::Value, key: &str) -> &'a serde_json::Value {
    values["values"]
        .as_array()
        .expect("values array")
        .iter()
        .find(|row| row["key"] == key)
        .unwrap_or_else(|| panic!("no row for {key}"))
}

#[test]
fn test_config_defaults() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_defaults");

    let output = CliEnv::new().run(&["--json", "config"]);

    assert!(output.status.success());
    let values: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(row(&values, "context")["value"], "cvr/verify");
    assert_eq!(row(&values, "context")["source"], "default");
    assert_eq!(row(&values, "page_size")["value"], "30");
    crate::test_log!("TEST PASS: test_config_defaults");
}

#[test]
fn test_config_reports_sources() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_reports_sources");

    let env = CliEnv::new();
    env.write_config("context = \"ci/custom\"\nkeep_workdirs = true\n");
    let output = env
        .command()
        .args(["--json", "config"])
        .env("CVR_PAGE_SIZE", "50")
        .output()
        .expect("Failed to run cvr config");

    assert!(output.status.success());
    let values: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(row(&values, "context")["value"], "ci/custom");
    assert!(
        row(&values, "context")["source"]
            .as_str()
            .unwrap()
            .starts_with("file:")
    );
    assert_eq!(row(&values, "page_size")["value"], "50");
    assert_eq!(row(&values, "page_size")["source"], "env:CVR_PAGE_SIZE");
    crate::test_log!("TEST PASS: test_config_reports_sources");
}

#[test]
fn test_config_error_findings_fail() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_error_findings_fail");

    let env = CliEnv::new();
    env.write_config("verify_command = []\n");
    let output = env.run(&["config"]);

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stdout), "error: verify_command");
    crate::test_log!("TEST PASS: test_config_error_findings_fail");
}

#[test]
fn test_config_unknown_key_is_parse_error() {
    init_test_logging();
    crate::test_log!("TEST START: test_config_unknown_key_is_parse_error");

    let env = CliEnv::new();
    env.write_config("contxt = \"typo\"\n");
    let output = env.run(&["config"]);

    assert!(!output.status.success());
    assert_contains(&String::from_utf8_lossy(&output.stderr), "CVR-E002");
    crate::test_log!("TEST PASS: test_config_unknown_key_is_parse_error");
}

#[test]
fn test_invalid_env_value_is_reported() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_env_value_is_reported");

    let output = CliEnv::new()
        .command()
        .arg("config")
        .env("CVR_PAGE_SIZE", "lots")
        .output()
        .expect("Failed to run cvr config");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "CVR-E004");
    assert_contains(&stderr, "CVR_PAGE_SIZE");
    crate::test_log!("TEST PASS: test_invalid_env_value_is_reported");
}
