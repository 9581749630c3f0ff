//! Command execution primitives with consistent output capture.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use serde::Serialize;

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    /// Output for a process that could not be spawned at all.
    pub fn spawn_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            success: false,
            exit_code: -1,
        }
    }
}

/// Run `script` through `shell -c` in `dir` with extra environment.
pub fn run_shell(
    shell: &str,
    script: &str,
    dir: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> CommandOutput {
    let mut cmd = Command::new(shell);
    cmd.args(["-c", script]);
    capture(cmd, dir, env)
}

/// Run a program directly (no shell) in `dir` with extra environment.
pub fn run_program(
    program: &str,
    args: &[String],
    dir: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> CommandOutput {
    let mut cmd = Command::new(program);
    cmd.args(args);
    capture(cmd, dir, env)
}

fn capture(mut cmd: Command, dir: Option<&Path>, env: &BTreeMap<String, String>) -> CommandOutput {
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env);

    match cmd.output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::spawn_failure(format!("Command error: {}", e)),
    }
}

/// Extract error text from command output.
///
/// Prefers stderr, falls back to stdout if stderr is empty.
pub fn error_text(output: &CommandOutput) -> String {
    if !output.stderr.trim().is_empty() {
        output.stderr.trim().to_string()
    } else {
        output.stdout.trim().to_string()
    }
}
