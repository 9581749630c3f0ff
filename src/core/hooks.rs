//! Command blocks: the pre hook, a task's own commands, and the post hook.
//!
//! A block runs its commands in order and stops at the first failing command
//! that does not set `continue_on_err`. Whether a failed block fails the task
//! is the caller's choice via [`HookFailureMode`].

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::descriptor::{Command, CommandKind, Descriptor};
use crate::engine::executor::{self, ExecEnv};
use crate::error::Error;
use crate::expansions::Expansions;
use crate::results::TestReport;
use crate::utils::command::{self, CommandOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Pre,
    Main,
    Post,
}

impl Block {
    pub fn as_str(&self) -> &'static str {
        match self {
            Block::Pre => "pre",
            Block::Main => "main",
            Block::Post => "post",
        }
    }
}

/// Whether a failed block fails the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookFailureMode {
    /// A failure fails the task.
    Fatal,
    /// Failures are recorded but the task outcome is unaffected.
    NonFatal,
}

impl HookFailureMode {
    pub fn from_flag(fails_task: bool) -> Self {
        if fails_task {
            HookFailureMode::Fatal
        } else {
            HookFailureMode::NonFatal
        }
    }
}

/// Result of one executed command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failed but `continue_on_err` let the block go on.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub continued: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResult {
    pub block: Block,
    pub commands: Vec<CommandRecord>,
    pub all_succeeded: bool,
    /// Failed and the failure mode says the task fails with it.
    pub fails_task: bool,
    #[serde(skip)]
    pub reports: Vec<TestReport>,
}

/// Runs command blocks for one task.
pub struct BlockRunner<'a> {
    pub descriptor: &'a Descriptor,
    pub env: &'a ExecEnv,
    pub task: &'a str,
}

impl<'a> BlockRunner<'a> {
    pub fn run(
        &self,
        block: Block,
        commands: &[Command],
        expansions: &mut Expansions,
        failure_mode: HookFailureMode,
    ) -> BlockResult {
        let mut result = BlockResult {
            block,
            commands: Vec::new(),
            all_succeeded: true,
            fails_task: false,
            reports: Vec::new(),
        };

        for command in commands {
            let keep_going = self.run_command(command, None, expansions, &mut result);
            if !keep_going {
                break;
            }
        }

        result.fails_task = !result.all_succeeded && failure_mode == HookFailureMode::Fatal;
        result
    }

    /// Run one command (or every command of a called function).
    /// Returns false when the block must stop.
    fn run_command(
        &self,
        command: &Command,
        caller: Option<&Command>,
        expansions: &mut Expansions,
        result: &mut BlockResult,
    ) -> bool {
        let continue_on_err =
            command.continue_on_err || caller.is_some_and(|c| c.continue_on_err);
        let function = caller.and_then(|c| c.func.clone());

        match command.kind() {
            CommandKind::Func(name) if caller.is_some() => {
                let message = format!("function '{}' cannot be called from a function", name);
                self.record_error(command, function, message, continue_on_err, result)
            }
            CommandKind::Func(name) => {
                let Some(body) = self.descriptor.function(name) else {
                    let referenced_by = Some(format!("tasks.{}", self.task));
                    let err = Error::function_not_found(name, referenced_by);
                    return self.record_error(command, None, err.message, continue_on_err, result);
                };

                let mut scoped = expansions.with_vars(&command.vars);
                let mut keep_going = true;
                for inner in body {
                    if !self.run_command(inner, Some(command), &mut scoped, result) {
                        keep_going = false;
                        break;
                    }
                }

                // Updates made inside the function outlive the call; vars do not.
                for (key, value) in scoped.as_map() {
                    if !command.vars.contains_key(key) {
                        expansions.put(key.clone(), value.clone());
                    }
                }
                keep_going
            }
            CommandKind::Builtin(name) => {
                log_status!("run", "[{}] {} {}", self.task, result.block.as_str(), command.label());
                let params: BTreeMap<String, Value> = command
                    .params
                    .iter()
                    .map(|(k, v)| (k.clone(), expansions.expand_value(v)))
                    .collect();

                let started = Instant::now();
                let outcome = executor::execute(name, &params, self.env, expansions);
                let duration_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(outcome) => {
                        let success = outcome.output.success;
                        let error = (!success).then(|| failure_text(&outcome.output, outcome.silent));
                        let CommandOutput {
                            stdout,
                            stderr,
                            exit_code,
                            ..
                        } = outcome.output;
                        let (stdout, stderr) = if outcome.silent {
                            (String::new(), String::new())
                        } else {
                            (stdout, stderr)
                        };
                        result.reports.extend(outcome.reports);
                        result.commands.push(CommandRecord {
                            label: command.label(),
                            function,
                            command: outcome.display,
                            success,
                            exit_code,
                            stdout,
                            stderr,
                            error,
                            continued: !success && continue_on_err,
                            duration_ms,
                        });
                        self.settle(success, continue_on_err, result)
                    }
                    Err(err) => {
                        let message = err.message.clone();
                        self.record_error(command, function, message, continue_on_err, result)
                    }
                }
            }
            CommandKind::Invalid => {
                let message = "command must set exactly one of 'func' or 'command'".to_string();
                self.record_error(command, function, message, continue_on_err, result)
            }
        }
    }

    fn record_error(
        &self,
        command: &Command,
        function: Option<String>,
        message: String,
        continue_on_err: bool,
        result: &mut BlockResult,
    ) -> bool {
        log_status!("run", "[{}] {} failed: {}", self.task, command.label(), message);
        result.commands.push(CommandRecord {
            label: command.label(),
            function,
            command: command.command.clone().unwrap_or_default(),
            success: false,
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(message),
            continued: continue_on_err,
            duration_ms: 0,
        });
        self.settle(false, continue_on_err, result)
    }

    fn settle(&self, success: bool, continue_on_err: bool, result: &mut BlockResult) -> bool {
        if success || continue_on_err {
            return true;
        }
        result.all_succeeded = false;
        false
    }
}

fn failure_text(output: &CommandOutput, silent: bool) -> String {
    let text = if silent { String::new() } else { command::error_text(output) };
    if text.is_empty() {
        format!("exited with code {}", output.exit_code)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_str;

    const DESCRIPTOR: &str = r#"
functions:
  greet:
    - command: shell.exec
      params:
        script: echo "hello ${who}" > greeting.txt
    - command: expansions.update
      params:
        updates:
          - key: greeted
            value: "${who}"
  broken:
    - command: shell.exec
      params: { script: "exit 2" }
    - command: shell.exec
      params: { script: "touch after-broken" }
tasks: []
buildvariants: []
"#;

    fn env_in(dir: &std::path::Path) -> ExecEnv {
        ExecEnv {
            work_dir: dir.to_path_buf(),
            source_root: dir.to_path_buf(),
            shell: "sh".to_string(),
        }
    }

    fn call(name: &str) -> Command {
        Command::func(name)
    }

    #[test]
    fn function_vars_are_scoped_and_updates_survive() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let env = env_in(dir.path());
        let runner = BlockRunner { descriptor: &descriptor, env: &env, task: "t" };

        let mut greet = call("greet");
        greet.vars.insert("who".into(), serde_json::Value::String("world".into()));
        let mut exp = Expansions::new();
        let result = runner.run(Block::Main, &[greet], &mut exp, HookFailureMode::Fatal);

        assert!(result.all_succeeded);
        assert_eq!(result.commands.len(), 2);
        assert_eq!(result.commands[0].function.as_deref(), Some("greet"));
        let written = std::fs::read_to_string(dir.path().join("greeting.txt")).unwrap();
        assert_eq!(written.trim(), "hello world");
        assert_eq!(exp.get("greeted"), Some("world"));
        assert_eq!(exp.get("who"), None);
    }

    #[test]
    fn failure_stops_block_and_respects_mode() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let env = env_in(dir.path());
        let runner = BlockRunner { descriptor: &descriptor, env: &env, task: "t" };

        let commands = vec![call("broken"), Command::shell("touch never")];
        let mut exp = Expansions::new();
        let fatal = runner.run(Block::Main, &commands, &mut exp, HookFailureMode::Fatal);
        assert!(!fatal.all_succeeded);
        assert!(fatal.fails_task);
        assert_eq!(fatal.commands.len(), 1);
        assert!(!dir.path().join("after-broken").exists());
        assert!(!dir.path().join("never").exists());

        let soft = runner.run(Block::Post, &commands, &mut exp, HookFailureMode::NonFatal);
        assert!(!soft.all_succeeded);
        assert!(!soft.fails_task);
    }

    #[test]
    fn continue_on_err_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let env = env_in(dir.path());
        let runner = BlockRunner { descriptor: &descriptor, env: &env, task: "t" };

        let mut failing = Command::shell("exit 1");
        failing.continue_on_err = true;
        let commands = vec![failing, Command::shell("touch reached")];
        let mut exp = Expansions::new();
        let result = runner.run(Block::Main, &commands, &mut exp, HookFailureMode::Fatal);

        assert!(result.all_succeeded);
        assert!(result.commands[0].continued);
        assert!(dir.path().join("reached").exists());
    }

    #[test]
    fn unknown_function_is_recorded_failure() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let env = env_in(dir.path());
        let runner = BlockRunner { descriptor: &descriptor, env: &env, task: "t" };

        let mut exp = Expansions::new();
        let result = runner.run(Block::Pre, &[call("missing")], &mut exp, HookFailureMode::Fatal);
        assert!(result.fails_task);
        assert_eq!(
            result.commands[0].error.as_deref(),
            Some("Function 'missing' not found")
        );
    }

    #[test]
    fn failed_command_records_error_text() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let env = env_in(dir.path());
        let runner = BlockRunner { descriptor: &descriptor, env: &env, task: "t" };

        let mut lint = Command::shell("echo 'lint failed' >&2; exit 3");
        lint.continue_on_err = true;
        let commands = vec![lint, Command::shell("exit 4")];
        let mut exp = Expansions::new();
        let result = runner.run(Block::Main, &commands, &mut exp, HookFailureMode::Fatal);

        assert_eq!(result.commands[0].exit_code, 3);
        assert_eq!(result.commands[0].error.as_deref(), Some("lint failed"));
        assert_eq!(result.commands[1].error.as_deref(), Some("exited with code 4"));
    }
}
