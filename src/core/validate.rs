//! Descriptor consistency checks.
//!
//! `validate` never stops at the first problem: it walks the whole descriptor
//! and returns every issue it finds. Errors make the descriptor unusable for
//! planning; warnings are reported but do not block a run.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::descriptor::{Command, CommandKind, Descriptor};
use crate::engine::executor;
use crate::engine::pipeline::{self, PipelineStep};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: String,
    /// Dotted path into the descriptor, e.g. `tasks.deploy.depends_on`.
    pub location: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<Issue>) -> Self {
        let error_count = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count();
        Self {
            valid: error_count == 0,
            error_count,
            warning_count: issues.len() - error_count,
            issues,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    /// Turn a report with errors into `validation.multiple_errors`.
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            return Ok(self);
        }
        let count = self.error_count;
        let details = serde_json::to_value(&self)
            .map_err(|e| Error::internal_json(e.to_string(), Some("validation report".into())))?;
        Err(Error::validation_multiple_errors(count, details))
    }
}

#[derive(Default)]
struct Collector {
    issues: Vec<Issue>,
}

impl Collector {
    fn error(&mut self, code: &str, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, code, location, message);
    }

    fn warning(&mut self, code: &str, location: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, code, location, message);
    }

    fn push(
        &mut self,
        severity: Severity,
        code: &str,
        location: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.issues.push(Issue {
            severity,
            code: code.to_string(),
            location: location.into(),
            message: message.into(),
        });
    }
}

/// Check a descriptor and collect every problem.
pub fn validate(descriptor: &Descriptor) -> ValidationReport {
    let mut out = Collector::default();

    check_names(descriptor, &mut out);
    check_commands(descriptor, &mut out);
    check_dependencies(descriptor, &mut out);
    check_variants(descriptor, &mut out);
    check_usage(descriptor, &mut out);

    ValidationReport::from_issues(out.issues)
}

fn check_names(descriptor: &Descriptor, out: &mut Collector) {
    let mut seen = HashSet::new();
    for task in &descriptor.tasks {
        if task.name.trim().is_empty() {
            out.error("empty_name", "tasks", "Task has an empty name");
        } else if !seen.insert(task.name.as_str()) {
            out.error(
                "duplicate_task",
                format!("tasks.{}", task.name),
                format!("Task '{}' is declared more than once", task.name),
            );
        }
    }

    if descriptor.buildvariants.is_empty() {
        out.error("no_variants", "buildvariants", "No build variants are declared");
    }

    let mut seen = HashSet::new();
    for variant in &descriptor.buildvariants {
        if !seen.insert(variant.name.as_str()) {
            out.error(
                "duplicate_variant",
                format!("buildvariants.{}", variant.name),
                format!("Build variant '{}' is declared more than once", variant.name),
            );
        }
    }
}

fn check_commands(descriptor: &Descriptor, out: &mut Collector) {
    for (name, body) in &descriptor.functions {
        let commands = body.commands();
        if commands.is_empty() {
            out.warning(
                "empty_function",
                format!("functions.{}", name),
                format!("Function '{}' has no commands", name),
            );
        }
        for (idx, command) in commands.iter().enumerate() {
            let location = format!("functions.{}[{}]", name, idx);
            if let CommandKind::Func(inner) = command.kind() {
                out.error(
                    "nested_function",
                    location,
                    format!("Function '{}' calls function '{}'; functions cannot nest", name, inner),
                );
                continue;
            }
            check_command(descriptor, command, &location, out);
        }
    }

    for (idx, command) in descriptor.pre.iter().enumerate() {
        check_command(descriptor, command, &format!("pre[{}]", idx), out);
    }
    for (idx, command) in descriptor.post.iter().enumerate() {
        check_command(descriptor, command, &format!("post[{}]", idx), out);
    }

    for task in &descriptor.tasks {
        if task.commands.is_empty() {
            out.warning(
                "empty_task",
                format!("tasks.{}", task.name),
                format!("Task '{}' has no commands", task.name),
            );
        }
        for (idx, command) in task.commands.iter().enumerate() {
            let location = format!("tasks.{}.commands[{}]", task.name, idx);
            check_command(descriptor, command, &location, out);
        }
        if !task.is_patchable() && task.patch_only {
            out.error(
                "conflicting_patch_flags",
                format!("tasks.{}", task.name),
                format!(
                    "Task '{}' is both non-patchable and patch-only; it can never run",
                    task.name
                ),
            );
        }
    }
}

fn check_command(descriptor: &Descriptor, command: &Command, location: &str, out: &mut Collector) {
    match command.kind() {
        CommandKind::Invalid => out.error(
            "invalid_command",
            location,
            "Command must set exactly one of 'func' or 'command'",
        ),
        CommandKind::Func(name) => {
            if descriptor.function(name).is_none() {
                out.error(
                    "unknown_function",
                    location,
                    format!("Function '{}' is not defined", name),
                );
            }
            if !command.params.is_empty() {
                out.warning(
                    "ignored_params",
                    location,
                    "Function calls take 'vars', not 'params'",
                );
            }
        }
        CommandKind::Builtin(name) => {
            if !executor::is_supported(name) {
                out.warning(
                    "unsupported_command",
                    location,
                    format!("Command '{}' is not supported by the local runner", name),
                );
                return;
            }
            for required in executor::required_params(name) {
                let present = required
                    .split('|')
                    .any(|key| command.params.contains_key(key));
                if !present {
                    out.error(
                        "missing_param",
                        location,
                        format!("Command '{}' requires param '{}'", name, required),
                    );
                }
            }
        }
    }
}

fn check_dependencies(descriptor: &Descriptor, out: &mut Collector) {
    let known: HashSet<&str> = descriptor.tasks.iter().map(|t| t.name.as_str()).collect();
    let mut steps = Vec::new();
    let mut added = HashSet::new();

    for task in &descriptor.tasks {
        let location = format!("tasks.{}.depends_on", task.name);
        let mut needs = Vec::new();
        for dep in task.dependency_names() {
            if dep == task.name {
                out.error(
                    "self_dependency",
                    &location,
                    format!("Task '{}' depends on itself", task.name),
                );
            } else if !known.contains(dep) {
                out.error(
                    "unknown_dependency",
                    &location,
                    format!("Task '{}' depends on unknown task '{}'", task.name, dep),
                );
            } else if !needs.iter().any(|n: &String| n == dep) {
                needs.push(dep.to_string());
            }
        }
        if added.insert(task.name.as_str()) {
            steps.push(PipelineStep::new(task.name.clone(), needs));
        }
    }

    if let Err(err) = pipeline::order_steps(&steps, "tasks") {
        out.error("dependency_cycle", "tasks", err.message);
    }
}

fn check_variants(descriptor: &Descriptor, out: &mut Collector) {
    for variant in &descriptor.buildvariants {
        let location = format!("buildvariants.{}", variant.name);
        let mut scheduled = HashSet::new();

        if variant.tasks.is_empty() {
            out.warning(
                "empty_variant",
                &location,
                format!("Build variant '{}' schedules no tasks", variant.name),
            );
        }

        for task_ref in &variant.tasks {
            if !scheduled.insert(task_ref.name.as_str()) {
                out.warning(
                    "duplicate_variant_task",
                    format!("{}.tasks", location),
                    format!("Task '{}' is listed more than once", task_ref.name),
                );
            }
            if descriptor.task(&task_ref.name).is_none() {
                out.error(
                    "unknown_task",
                    format!("{}.tasks", location),
                    format!("Task '{}' is not defined", task_ref.name),
                );
            }
        }

        for task_ref in &variant.tasks {
            let Some(task) = descriptor.task(&task_ref.name) else {
                continue;
            };
            for dep in task.dependency_names() {
                if descriptor.task(dep).is_some() && !scheduled.contains(dep) {
                    out.error(
                        "dependency_not_scheduled",
                        format!("{}.tasks", location),
                        format!(
                            "Task '{}' depends on '{}', which is not scheduled on '{}'",
                            task.name, dep, variant.name
                        ),
                    );
                }
            }
        }

        let mut display_names = HashSet::new();
        for display in &variant.display_tasks {
            let display_location = format!("{}.display_tasks.{}", location, display.name);
            if !display_names.insert(display.name.as_str()) {
                out.error(
                    "duplicate_display_task",
                    &display_location,
                    format!("Display task '{}' is declared more than once", display.name),
                );
            }
            if descriptor.task(&display.name).is_some() {
                out.error(
                    "display_task_name_collision",
                    &display_location,
                    format!("Display task '{}' shares its name with a task", display.name),
                );
            }
            if display.execution_tasks.is_empty() {
                out.warning(
                    "empty_display_task",
                    &display_location,
                    format!("Display task '{}' has no execution tasks", display.name),
                );
            }
            for exec in &display.execution_tasks {
                if !scheduled.contains(exec.as_str()) {
                    out.error(
                        "display_task_unknown",
                        &display_location,
                        format!(
                            "Execution task '{}' is not scheduled on '{}'",
                            exec, variant.name
                        ),
                    );
                }
            }
        }
    }
}

fn check_usage(descriptor: &Descriptor, out: &mut Collector) {
    let scheduled: HashSet<&str> = descriptor
        .buildvariants
        .iter()
        .flat_map(|v| v.tasks.iter().map(|t| t.name.as_str()))
        .collect();

    for task in &descriptor.tasks {
        if !scheduled.contains(task.name.as_str()) {
            out.warning(
                "unscheduled_task",
                format!("tasks.{}", task.name),
                format!("Task '{}' is not scheduled on any build variant", task.name),
            );
        }
    }

    let mut called: BTreeSet<&str> = BTreeSet::new();
    let hook_calls = descriptor.pre.iter().chain(descriptor.post.iter());
    let task_calls = descriptor.tasks.iter().flat_map(|t| t.commands.iter());
    for command in hook_calls.chain(task_calls) {
        if let CommandKind::Func(name) = command.kind() {
            called.insert(name);
        }
    }

    for name in descriptor.functions.keys() {
        if !called.contains(name.as_str()) {
            out.warning(
                "unused_function",
                format!("functions.{}", name),
                format!("Function '{}' is never called", name),
            );
        }
    }
}

/// Functions a task calls directly, in call order, each listed once.
pub fn functions_used_by(descriptor: &Descriptor, task: &str) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    if let Some(task) = descriptor.task(task) {
        for name in task.function_calls() {
            if !ordered.iter().any(|seen| seen == name) {
                ordered.push(name.to_string());
            }
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_str;

    fn report(yaml: &str) -> ValidationReport {
        validate(&parse_str(yaml, "test.yml").unwrap())
    }

    const VALID: &str = r#"
functions:
  "run tests":
    command: shell.exec
    params: { script: tox }
tasks:
  - name: unit_tests
    commands:
      - func: "run tests"
  - name: deploy
    patchable: false
    depends_on: [unit_tests]
    commands:
      - command: shell.exec
        params: { script: ./deploy.sh }
buildvariants:
  - name: ubuntu
    tasks: [unit_tests, deploy]
    display_tasks:
      - name: tests
        execution_tasks: [unit_tests]
"#;

    #[test]
    fn valid_descriptor_has_no_issues() {
        let report = report(VALID);
        assert!(report.valid, "{:?}", report.issues);
        assert_eq!(report.warning_count, 0);
        assert!(report.into_result().is_ok());
    }

    #[test]
    fn unknown_references_are_errors() {
        let report = report(
            r#"
tasks:
  - name: a
    depends_on: [ghost]
    commands:
      - func: missing
buildvariants:
  - name: v
    tasks: [a, nope]
"#,
        );
        assert!(!report.valid);
        assert!(report.has_code("unknown_dependency"));
        assert!(report.has_code("unknown_function"));
        assert!(report.has_code("unknown_task"));
    }

    #[test]
    fn cycles_and_self_dependencies() {
        let report = report(
            r#"
tasks:
  - name: a
    depends_on: [b]
    commands: [{ command: shell.exec, params: { script: "true" } }]
  - name: b
    depends_on: [a, b]
    commands: [{ command: shell.exec, params: { script: "true" } }]
buildvariants:
  - name: v
    tasks: [a, b]
"#,
        );
        assert!(report.has_code("dependency_cycle"));
        assert!(report.has_code("self_dependency"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let report = report(
            r#"
tasks:
  - name: a
    commands: [{ command: shell.exec, params: { script: "true" } }]
  - name: a
    commands: [{ command: shell.exec, params: { script: "false" } }]
buildvariants:
  - name: v
    tasks: [a, a]
  - name: v
    tasks: [a]
"#,
        );
        assert!(!report.valid);
        assert!(report.has_code("duplicate_task"));
        assert!(report.has_code("duplicate_variant"));
        assert!(report.has_code("duplicate_variant_task"));
    }

    #[test]
    fn dependency_must_be_scheduled_on_variant() {
        let report = report(
            r#"
tasks:
  - name: a
    commands: [{ command: shell.exec, params: { script: "true" } }]
  - name: b
    depends_on: [a]
    commands: [{ command: shell.exec, params: { script: "true" } }]
buildvariants:
  - name: v
    tasks: [b]
"#,
        );
        assert!(report.has_code("dependency_not_scheduled"));
        assert!(report.has_code("unscheduled_task"));
    }

    #[test]
    fn display_task_checks() {
        let report = report(
            r#"
tasks:
  - name: a
    commands: [{ command: shell.exec, params: { script: "true" } }]
buildvariants:
  - name: v
    tasks: [a]
    display_tasks:
      - name: a
        execution_tasks: [a, other]
"#,
        );
        assert!(report.has_code("display_task_name_collision"));
        assert!(report.has_code("display_task_unknown"));
    }

    #[test]
    fn command_shape_checks() {
        let report = report(
            r#"
functions:
  outer:
    - func: inner
  inner:
    - command: shell.exec
      params: {}
tasks:
  - name: a
    commands:
      - func: outer
        command: shell.exec
      - command: s3.put
      - func: outer
buildvariants:
  - name: v
    tasks: [a]
"#,
        );
        assert!(report.has_code("nested_function"));
        assert!(report.has_code("missing_param"));
        assert!(report.has_code("invalid_command"));
        let unsupported: Vec<_> = report.warnings().map(|w| w.code.as_str()).collect();
        assert!(unsupported.contains(&"unsupported_command"));
        assert!(unsupported.contains(&"unused_function"));
    }

    #[test]
    fn conflicting_patch_flags() {
        let report = report(
            r#"
tasks:
  - name: a
    patchable: false
    patch_only: true
    commands: [{ command: shell.exec, params: { script: "true" } }]
buildvariants:
  - name: v
    tasks: [a]
"#,
        );
        assert!(report.has_code("conflicting_patch_flags"));
    }

    #[test]
    fn no_variants_is_error_and_converts_to_multiple_errors() {
        let report = report("tasks: []\n");
        assert!(report.has_code("no_variants"));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ValidationMultipleErrors);
        assert_eq!(err.details["errorCount"], 1);
    }

    #[test]
    fn functions_used_by_lists_calls_once() {
        let descriptor = parse_str(VALID, "test.yml").unwrap();
        assert_eq!(functions_used_by(&descriptor, "unit_tests"), vec!["run tests"]);
        assert!(functions_used_by(&descriptor, "deploy").is_empty());
    }
}
