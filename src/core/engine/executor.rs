// Built-in command execution for the local runner.
//
// Every built-in receives params that were already expanded against the
// task's expansions. Configuration problems (missing or mistyped params) are
// returned as errors; a process that runs and exits non-zero is a normal
// outcome with `success == false`.
//
// ### Supported commands
// - shell.exec            script through a shell (`sh -c` by default)
// - subprocess.exec       binary + args, no shell
// - git.get_project       materialize the source tree under the work dir
// - attach.xunit_results  ingest JUnit reports
// - expansions.update     add expansions for the rest of the task

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::expansions::{self, Expansions};
use crate::results::{self, TestReport};
use crate::utils::command::{self, CommandOutput};
use crate::utils::shell;

pub const SHELL_EXEC: &str = "shell.exec";
pub const SUBPROCESS_EXEC: &str = "subprocess.exec";
pub const GIT_GET_PROJECT: &str = "git.get_project";
pub const ATTACH_XUNIT: &str = "attach.xunit_results";
pub const EXPANSIONS_UPDATE: &str = "expansions.update";

pub const SUPPORTED_COMMANDS: &[&str] = &[
    SHELL_EXEC,
    SUBPROCESS_EXEC,
    GIT_GET_PROJECT,
    ATTACH_XUNIT,
    EXPANSIONS_UPDATE,
];

pub fn is_supported(command: &str) -> bool {
    SUPPORTED_COMMANDS.contains(&command)
}

/// Params each built-in cannot run without. Alternatives are joined by `|`.
pub fn required_params(command: &str) -> &'static [&'static str] {
    match command {
        SHELL_EXEC => &["script"],
        SUBPROCESS_EXEC => &["binary|command"],
        GIT_GET_PROJECT => &["directory"],
        ATTACH_XUNIT => &["file|files"],
        EXPANSIONS_UPDATE => &["updates|file"],
        _ => &[],
    }
}

/// Where commands run.
#[derive(Debug, Clone)]
pub struct ExecEnv {
    pub work_dir: PathBuf,
    pub source_root: PathBuf,
    pub shell: String,
}

/// What a built-in produced.
#[derive(Debug, Clone, Default)]
pub struct CommandOutcome {
    pub output: CommandOutput,
    /// Rendered command line, for records.
    pub display: String,
    pub reports: Vec<TestReport>,
    /// Drop stdout/stderr from records.
    pub silent: bool,
}

impl CommandOutcome {
    fn ok(display: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            output: CommandOutput {
                stdout: message.into(),
                stderr: String::new(),
                success: true,
                exit_code: 0,
            },
            display: display.into(),
            ..Self::default()
        }
    }
}

/// Execute one built-in. `expansions` is updated in place by `expansions.update`.
pub fn execute(
    command: &str,
    params: &BTreeMap<String, Value>,
    env: &ExecEnv,
    expansions: &mut Expansions,
) -> Result<CommandOutcome> {
    match command {
        SHELL_EXEC => shell_exec(params, env, expansions),
        SUBPROCESS_EXEC => subprocess_exec(params, env, expansions),
        GIT_GET_PROJECT => git_get_project(params, env),
        ATTACH_XUNIT => attach_xunit_results(params, env),
        EXPANSIONS_UPDATE => expansions_update(params, env, expansions),
        other => Err(Error::command_unsupported(other)),
    }
}

fn shell_exec(
    params: &BTreeMap<String, Value>,
    env: &ExecEnv,
    expansions: &Expansions,
) -> Result<CommandOutcome> {
    let script = require_str(params, SHELL_EXEC, "script")?;
    let shell_bin = optional_str(params, "shell").unwrap_or_else(|| env.shell.clone());
    let dir = working_dir(params, env);
    let vars = process_env(params, expansions)?;

    let output = command::run_shell(&shell_bin, &script, Some(&dir), &vars);
    Ok(CommandOutcome {
        output,
        display: format!("{} -c <script>", shell_bin),
        reports: Vec::new(),
        silent: optional_bool(params, "silent"),
    })
}

fn subprocess_exec(
    params: &BTreeMap<String, Value>,
    env: &ExecEnv,
    expansions: &Expansions,
) -> Result<CommandOutcome> {
    let (binary, args) = match optional_str(params, "binary") {
        Some(binary) => (binary, string_list(params, SUBPROCESS_EXEC, "args")?),
        None => {
            let line = require_str(params, SUBPROCESS_EXEC, "command").map_err(|_| {
                Error::validation_invalid_argument(
                    SUBPROCESS_EXEC,
                    "subprocess.exec needs 'binary' or 'command'",
                    None,
                    None,
                )
            })?;
            let mut words = shell::split_words(&line).ok_or_else(|| {
                Error::validation_invalid_argument(
                    SUBPROCESS_EXEC,
                    format!("Unbalanced quotes in command '{}'", line),
                    None,
                    None,
                )
            })?;
            if words.is_empty() {
                return Err(Error::validation_invalid_argument(
                    SUBPROCESS_EXEC,
                    "Empty command",
                    None,
                    None,
                ));
            }
            let binary = words.remove(0);
            (binary, words)
        }
    };

    let dir = working_dir(params, env);
    let vars = process_env(params, expansions)?;
    let display = if args.is_empty() {
        shell::quote_arg(&binary)
    } else {
        format!("{} {}", shell::quote_arg(&binary), shell::quote_args(&args))
    };

    let output = command::run_program(&binary, &args, Some(&dir), &vars);
    Ok(CommandOutcome {
        output,
        display,
        reports: Vec::new(),
        silent: optional_bool(params, "silent"),
    })
}

fn git_get_project(params: &BTreeMap<String, Value>, env: &ExecEnv) -> Result<CommandOutcome> {
    let directory = require_str(params, GIT_GET_PROJECT, "directory")?;
    let target = env.work_dir.join(&directory);
    let display = format!("{} {}", GIT_GET_PROJECT, directory);

    if target.exists() {
        return Ok(CommandOutcome::ok(
            display,
            format!("{} already present", target.display()),
        ));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let source = env.source_root.canonicalize().map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("resolve source root {}", env.source_root.display())),
        )
    })?;
    if !link_source(&source, &target)? {
        return Ok(CommandOutcome::ok(
            display,
            format!("{} already present", target.display()),
        ));
    }

    Ok(CommandOutcome::ok(
        display,
        format!("{} -> {}", target.display(), source.display()),
    ))
}

/// Returns false when another task created the target first.
#[cfg(unix)]
fn link_source(source: &Path, target: &Path) -> Result<bool> {
    match std::os::unix::fs::symlink(source, target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::internal_io(
            e.to_string(),
            Some(format!("link {}", target.display())),
        )),
    }
}

#[cfg(not(unix))]
fn link_source(_source: &Path, target: &Path) -> Result<bool> {
    Err(Error::command_unsupported(GIT_GET_PROJECT).with_hint(format!(
        "Check the project out into {} before running",
        target.display()
    )))
}

fn attach_xunit_results(params: &BTreeMap<String, Value>, env: &ExecEnv) -> Result<CommandOutcome> {
    let mut patterns = string_list(params, ATTACH_XUNIT, "files")?;
    if let Some(file) = optional_str(params, "file") {
        patterns.insert(0, file);
    }
    if patterns.is_empty() {
        return Err(missing_param(ATTACH_XUNIT, "file"));
    }

    let reports = results::load_reports(&env.work_dir, &patterns)?;
    let display = format!("{} {}", ATTACH_XUNIT, patterns.join(" "));

    if reports.is_empty() {
        return Ok(CommandOutcome {
            output: CommandOutput {
                stdout: String::new(),
                stderr: format!("no report files matched {}", patterns.join(", ")),
                success: false,
                exit_code: 1,
            },
            display,
            ..CommandOutcome::default()
        });
    }

    let attached = reports.len();
    let mut outcome = CommandOutcome::ok(display, format!("attached {} report(s)", attached));
    outcome.reports = reports;
    Ok(outcome)
}

fn expansions_update(
    params: &BTreeMap<String, Value>,
    env: &ExecEnv,
    expansions: &mut Expansions,
) -> Result<CommandOutcome> {
    let mut updated = Vec::new();

    if let Some(file) = optional_str(params, "file") {
        let path = env.work_dir.join(&file);
        for (key, value) in expansions::load_file(&path)? {
            updated.push(key.clone());
            expansions.put(key, value);
        }
    }

    match params.get("updates") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                let key = item.get("key").and_then(Value::as_str).ok_or_else(|| {
                    Error::validation_invalid_argument(
                        EXPANSIONS_UPDATE,
                        "Each update needs a string 'key'",
                        None,
                        None,
                    )
                })?;
                let value = item.get("value").map(expansions::stringify).unwrap_or_default();
                updated.push(key.to_string());
                expansions.put(key, value);
            }
        }
        Some(_) => {
            return Err(Error::validation_invalid_argument(
                EXPANSIONS_UPDATE,
                "'updates' must be a list of {key, value}",
                None,
                None,
            ))
        }
    }

    if updated.is_empty() && !params.contains_key("file") {
        return Err(missing_param(EXPANSIONS_UPDATE, "updates"));
    }

    Ok(CommandOutcome::ok(
        EXPANSIONS_UPDATE,
        format!("updated: {}", updated.join(", ")),
    ))
}

fn working_dir(params: &BTreeMap<String, Value>, env: &ExecEnv) -> PathBuf {
    match optional_str(params, "working_dir") {
        Some(dir) if !dir.is_empty() => env.work_dir.join(dir),
        _ => env.work_dir.clone(),
    }
}

/// Environment for a spawned process: `env` param plus, when
/// `add_expansions_to_env` is set, every expansion.
fn process_env(
    params: &BTreeMap<String, Value>,
    expansions: &Expansions,
) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    if optional_bool(params, "add_expansions_to_env") {
        vars.extend(expansions.as_map().clone());
    }

    match params.get("env") {
        None | Some(Value::Null) => {}
        Some(Value::Object(map)) => {
            for (key, value) in map {
                vars.insert(key.clone(), expansions::stringify(value));
            }
        }
        Some(_) => {
            return Err(Error::validation_invalid_argument(
                "env",
                "'env' must be a mapping",
                None,
                None,
            ))
        }
    }

    Ok(vars)
}

fn missing_param(command: &str, param: &str) -> Error {
    Error::validation_invalid_argument(
        command,
        format!("{} requires param '{}'", command, param),
        None,
        None,
    )
}

fn require_str(params: &BTreeMap<String, Value>, command: &str, key: &str) -> Result<String> {
    optional_str(params, key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| missing_param(command, key))
}

fn optional_str(params: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(expansions::stringify(other)),
    }
}

fn optional_bool(params: &BTreeMap<String, Value>, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        _ => false,
    }
}

fn string_list(params: &BTreeMap<String, Value>, command: &str, key: &str) -> Result<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().map(expansions::stringify).collect()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(_) => Err(Error::validation_invalid_argument(
            command,
            format!("'{}' must be a list of strings", key),
            None,
            None,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn env_in(dir: &Path) -> ExecEnv {
        ExecEnv {
            work_dir: dir.to_path_buf(),
            source_root: dir.to_path_buf(),
            shell: "sh".to_string(),
        }
    }

    #[test]
    fn shell_exec_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/marker"), "x").unwrap();

        let mut exp = Expansions::new();
        let outcome = execute(
            SHELL_EXEC,
            &params(json!({ "working_dir": "src", "script": "ls marker" })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert!(outcome.output.success);
        assert_eq!(outcome.output.stdout.trim(), "marker");
    }

    #[test]
    fn shell_exec_non_zero_is_unsuccessful_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let outcome = execute(
            SHELL_EXEC,
            &params(json!({ "script": "set -o errexit\nfalse\necho unreachable" })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert!(!outcome.output.success);
        assert!(!outcome.output.stdout.contains("unreachable"));
    }

    #[test]
    fn shell_exec_requires_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let err = execute(SHELL_EXEC, &params(json!({})), &env_in(dir.path()), &mut exp)
            .unwrap_err();
        assert!(err.message.contains("script"));
    }

    #[test]
    fn shell_exec_exports_expansions_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        exp.put("pypi_user", "bot");
        let outcome = execute(
            SHELL_EXEC,
            &params(json!({
                "script": "echo $pypi_user $EXTRA",
                "add_expansions_to_env": true,
                "env": { "EXTRA": 7 }
            })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert_eq!(outcome.output.stdout.trim(), "bot 7");
    }

    #[test]
    fn subprocess_exec_splits_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let outcome = execute(
            SUBPROCESS_EXEC,
            &params(json!({ "command": "echo 'hello world'" })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert!(outcome.output.success);
        assert_eq!(outcome.output.stdout.trim(), "hello world");
        assert_eq!(outcome.display, "echo 'hello world'");
    }

    #[test]
    fn subprocess_exec_binary_and_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let outcome = execute(
            SUBPROCESS_EXEC,
            &params(json!({ "binary": "sh", "args": ["-c", "exit 4"] })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert_eq!(outcome.output.exit_code, 4);
    }

    #[cfg(unix)]
    #[test]
    fn git_get_project_links_source_once() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("setup.py"), "").unwrap();
        let work = tempfile::tempdir().unwrap();
        let env = ExecEnv {
            work_dir: work.path().to_path_buf(),
            source_root: source.path().to_path_buf(),
            shell: "sh".to_string(),
        };

        let mut exp = Expansions::new();
        let p = params(json!({ "directory": "src" }));
        let first = execute(GIT_GET_PROJECT, &p, &env, &mut exp).unwrap();
        assert!(first.output.success);
        assert!(work.path().join("src/setup.py").exists());

        let second = execute(GIT_GET_PROJECT, &p, &env, &mut exp).unwrap();
        assert!(second.output.stdout.contains("already present"));
    }

    #[cfg(unix)]
    #[test]
    fn concurrent_git_get_project_all_succeed() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("setup.py"), "").unwrap();

        for _ in 0..50 {
            let work = tempfile::tempdir().unwrap();
            let env = ExecEnv {
                work_dir: work.path().to_path_buf(),
                source_root: source.path().to_path_buf(),
                shell: "sh".to_string(),
            };
            let barrier = std::sync::Barrier::new(4);

            std::thread::scope(|scope| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(|| {
                            let mut exp = Expansions::new();
                            barrier.wait();
                            execute(
                                GIT_GET_PROJECT,
                                &params(json!({ "directory": "src" })),
                                &env,
                                &mut exp,
                            )
                        })
                    })
                    .collect();
                for handle in handles {
                    let outcome = handle.join().unwrap().unwrap();
                    assert!(outcome.output.success);
                }
            });
            assert!(work.path().join("src/setup.py").exists());
        }
    }

    #[test]
    fn attach_without_matches_fails_softly() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let outcome = execute(
            ATTACH_XUNIT,
            &params(json!({ "file": "src/junit-*.xml" })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert!(!outcome.output.success);
        assert!(outcome.reports.is_empty());
    }

    #[test]
    fn expansions_update_adds_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        execute(
            EXPANSIONS_UPDATE,
            &params(json!({ "updates": [{ "key": "python", "value": 3.6 }] })),
            &env_in(dir.path()),
            &mut exp,
        )
        .unwrap();
        assert_eq!(exp.get("python"), Some("3.6"));
    }

    #[test]
    fn unsupported_command_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut exp = Expansions::new();
        let err = execute("s3.put", &BTreeMap::new(), &env_in(dir.path()), &mut exp).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::CommandUnsupported);
    }
}
