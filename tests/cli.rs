#![cfg(unix)]

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const REGISTRY: &str = r#"
concurrency = 1
grace_period_secs = 1

[publish]
program = "sh"
args = ["-c", 'if [ "$1" = "$FAIL_TARGET" ]; then echo "boom from $1" >&2; exit 3; fi', "sh", "{{targetName}}"]

[publish.env]
FAIL_TARGET = "alpha"

[[targets]]
name = "alpha"
source_path = "alpha/"
workspace_id = "ws-alpha"
credential_ref = "env:CLI_TEST_TOKEN"

[[targets]]
name = "beta"
source_path = "beta/"
workspace_id = "ws-beta"
credential_ref = "env:CLI_TEST_TOKEN"
"#;

fn write_registry(content: &str) -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("deploy-dispatcher.toml");
    std::fs::write(&path, content).unwrap();
    let path = path.to_string_lossy().to_string();
    (dir, path)
}

fn dispatcher(config: &str, cwd: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_deploy-dispatcher"))
        .args(args)
        .arg("--config")
        .arg(config)
        .current_dir(cwd)
        .env("CLI_TEST_TOKEN", "cli-secret")
        .env_remove("DEPLOY_DISPATCHER_CONFIG")
        .env_remove("GITHUB_SHA")
        .env_remove("GITHUB_REPOSITORY")
        .output()
        .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

const PROVENANCE: [&str; 4] = [
    "--version-label",
    "abc123",
    "--provenance-url",
    "https://github.com/org/repo/commit/abc123",
];

#[test]
fn affected_lists_targets_in_registry_order() {
    let (dir, config) = write_registry(REGISTRY);
    let output = dispatcher(
        &config,
        dir.path(),
        &["affected", "--changed", "beta/x.py", "--changed", "alpha/y.py"],
    );

    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    let names: Vec<&str> = json["data"]["affected"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha", "beta"]);
    assert_eq!(json["data"]["affected"][0]["reason"], "source_path");
}

#[test]
fn run_prints_summary_and_exits_with_first_failure() {
    let (dir, config) = write_registry(REGISTRY);
    let mut args = vec!["run", "--changed", "alpha/a.py", "--changed", "beta/b.py"];
    args.extend(PROVENANCE);
    let output = dispatcher(&config, dir.path(), &args);

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "failed  alpha (exit 3): boom from alpha\nok      beta\n"
    );
    assert!(!String::from_utf8_lossy(&output.stderr).contains("cli-secret"));
}

#[test]
fn run_with_no_affected_targets_succeeds_silently() {
    let (dir, config) = write_registry(REGISTRY);
    let output = dispatcher(&config, dir.path(), &["run", "--changed", "docs/README.md"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}

#[test]
fn run_json_reports_results() {
    let (dir, config) = write_registry(REGISTRY);
    let mut args = vec!["run", "--json", "--changed", "beta/b.py"];
    args.extend(PROVENANCE);
    let output = dispatcher(&config, dir.path(), &args);

    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["data"]["command"], "run");
    assert_eq!(json["data"]["results"][0]["target_name"], "beta");
    assert_eq!(json["data"]["results"][0]["message"], "published");
    assert_eq!(json["data"]["aggregate"]["exit_code"], 0);
}

#[test]
fn dry_run_plans_without_publishing() {
    let (dir, config) = write_registry(REGISTRY);
    let mut args = vec!["run", "--dry-run", "--changed", "alpha/a.py"];
    args.extend(PROVENANCE);
    let output = dispatcher(&config, dir.path(), &args);

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "planned alpha -> ws-alpha\n"
    );
}

#[test]
fn missing_change_source_is_a_usage_error() {
    let (dir, config) = write_registry(REGISTRY);
    let output = dispatcher(&config, dir.path(), &["affected"]);

    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["error"]["code"], "validation.missing_argument");
}

#[test]
fn duplicate_target_names_fail_before_anything_runs() {
    let duplicate = format!(
        "{}\n[[targets]]\nname = \"alpha\"\nsource_path = \"gamma/\"\nworkspace_id = \"w\"\ncredential_ref = \"T\"\n",
        REGISTRY
    );
    let (dir, config) = write_registry(&duplicate);
    let output = dispatcher(&config, dir.path(), &["targets"]);

    assert_eq!(output.status.code(), Some(2));
    let json = stdout_json(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "config.duplicate_target");
}

#[test]
fn missing_registry_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("absent.toml");
    let output = dispatcher(&config.to_string_lossy(), dir.path(), &["targets"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn targets_can_check_credentials_without_revealing_them() {
    let (dir, config) = write_registry(REGISTRY);
    let output = dispatcher(&config, dir.path(), &["targets", "--check-credentials"]);

    assert_eq!(output.status.code(), Some(0));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(!text.contains("cli-secret"));
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["data"]["targets"][0]["credential_resolved"], true);
    assert_eq!(json["data"]["targets"][1]["timeout_secs"], 1800);
}
