use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value;

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("evergreen.yml")
}

fn evgpipe_raw(home: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_evgpipe"))
        .args(args)
        .env("HOME", home)
        .output()
        .unwrap()
}

/// Run the CLI with an empty HOME so no user config leaks in.
fn evgpipe(args: &[&str]) -> (i32, Value) {
    let home = tempfile::tempdir().unwrap();
    evgpipe_in(home.path(), args)
}

fn evgpipe_in(home: &Path, args: &[&str]) -> (i32, Value) {
    let output = evgpipe_raw(home, args);
    let json: Value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not JSON ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    });
    (output.status.code().unwrap_or(-1), json)
}

#[test]
fn validate_reports_clean_descriptor() {
    let file = fixture();
    let (code, json) = evgpipe(&["validate", file.to_str().unwrap()]);

    assert_eq!(code, 0);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["valid"], true);
    assert_eq!(json["data"]["errorCount"], 0);
}

#[test]
fn list_shows_variant_and_tasks() {
    let file = fixture();
    let (code, json) = evgpipe(&["list", file.to_str().unwrap()]);

    assert_eq!(code, 0);
    let variant = &json["data"]["variants"][0];
    assert_eq!(variant["name"], "ubuntu1604");
    assert_eq!(variant["displayTasks"][0]["name"], "yapf");

    let tasks = json["data"]["tasks"].as_array().unwrap();
    let deploy = tasks.iter().find(|t| t["name"] == "deploy").unwrap();
    assert_eq!(deploy["patchable"], false);
    assert_eq!(deploy["dependsOn"].as_array().unwrap().len(), 3);
}

#[test]
fn plan_with_patch_skips_deploy() {
    let file = fixture();
    let (code, json) = evgpipe(&["plan", file.to_str().unwrap(), "--patch"]);

    assert_eq!(code, 0);
    assert_eq!(json["data"]["isPatch"], true);
    let tasks = json["data"]["tasks"].as_array().unwrap();
    let deploy = tasks.iter().find(|t| t["name"] == "deploy").unwrap();
    assert_eq!(deploy["status"], "skipped");
    assert_eq!(deploy["reason"], "not_patchable");
}

#[test]
fn unknown_variant_exits_not_found() {
    let file = fixture();
    let (code, json) = evgpipe(&["plan", file.to_str().unwrap(), "--variant", "windows"]);

    assert_eq!(code, 4);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "descriptor.variant_not_found");
}

#[test]
fn broken_descriptor_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("evergreen.yml");
    std::fs::write(&file, "tasks: [\n").unwrap();

    let (code, json) = evgpipe(&["validate", file.to_str().unwrap()]);
    assert_eq!(code, 2);
    assert_eq!(json["error"]["code"], "config.invalid_yaml");
}

#[cfg(unix)]
#[test]
fn run_of_failing_task_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("evergreen.yml");
    std::fs::write(
        &file,
        r#"
tasks:
  - name: check
    commands:
      - command: shell.exec
        params:
          script: "echo ${greeting|hi} > out.txt; exit 1"
buildvariants:
  - name: local
    tasks: [check]
"#,
    )
    .unwrap();
    let work = dir.path().join("work");

    let (code, json) = evgpipe(&[
        "run",
        file.to_str().unwrap(),
        "--work-dir",
        work.to_str().unwrap(),
        "-e",
        "greeting=hello",
    ]);

    assert_eq!(code, 1);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["summary"]["failed"], 1);
    assert_eq!(json["data"]["tasks"][0]["status"], "failed");
    let written = std::fs::read_to_string(work.join("out.txt")).unwrap();
    assert_eq!(written.trim(), "hello");
}

#[test]
fn invalid_config_file_is_reported() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join(".config/evgpipe");
    std::fs::create_dir_all(&config_dir).unwrap();
    let file = fixture();

    std::fs::write(config_dir.join("evgpipe.json"), "{ not json").unwrap();
    let (code, json) = evgpipe_in(home.path(), &["validate", file.to_str().unwrap()]);
    assert_eq!(code, 2);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "config.invalid_json");

    std::fs::write(
        config_dir.join("evgpipe.json"),
        r#"{"defaults": {"jobs": 0, "shell": "bash"}}"#,
    )
    .unwrap();
    let (code, json) = evgpipe_in(home.path(), &["validate", file.to_str().unwrap()]);
    assert_eq!(code, 2);
    assert_eq!(json["error"]["code"], "config.invalid_value");
    assert_eq!(json["error"]["details"]["key"], "defaults.jobs");
}

#[test]
fn valid_config_selects_default_descriptor() {
    let home = tempfile::tempdir().unwrap();
    let config_dir = home.path().join(".config/evgpipe");
    std::fs::create_dir_all(&config_dir).unwrap();
    let config = serde_json::json!({ "defaults": { "descriptor": fixture() } });
    std::fs::write(config_dir.join("evgpipe.json"), config.to_string()).unwrap();

    let (code, json) = evgpipe_in(home.path(), &["list"]);
    assert_eq!(code, 0);
    assert_eq!(json["data"]["variants"][0]["name"], "ubuntu1604");
}

#[test]
fn yaml_output_carries_the_same_envelope() {
    let home = tempfile::tempdir().unwrap();
    let file = fixture();
    let output = evgpipe_raw(
        home.path(),
        &["plan", file.to_str().unwrap(), "--patch", "--output", "yaml"],
    );

    assert_eq!(output.status.code(), Some(0));
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("success: true"), "{}", text);
    let yaml: Value = serde_yml::from_str(&text).unwrap();
    assert_eq!(yaml["data"]["isPatch"], true);
    let tasks = yaml["data"]["tasks"].as_array().unwrap();
    let deploy = tasks.iter().find(|t| t["name"] == "deploy").unwrap();
    assert_eq!(deploy["status"], "skipped");
}
