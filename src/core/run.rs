//! Local task runner.
//!
//! Each planned task runs as: pre hook, task commands, post hook. The post
//! hook always runs. Tasks execute in dependency order through the pipeline
//! engine; display tasks are resolved from their execution tasks afterwards.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::context::{Requester, RunContext};
use crate::descriptor::{BuildVariant, Descriptor};
use crate::engine::executor::ExecEnv;
use crate::engine::pipeline::{self, PipelineStep, PipelineStepExecutor, StepResult, StepStatus};
use crate::error::{Error, Result};
use crate::hooks::{Block, BlockResult, BlockRunner, HookFailureMode};
use crate::plan::{self, Plan};
use crate::results::{TestReport, TestResultsSummary};

/// What happened inside a task that was actually started.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub blocks: Vec<BlockResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reports: Vec<TestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestResultsSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn block(&self, block: Block) -> Option<&BlockResult> {
        self.blocks.iter().find(|b| b.block == block)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutcome {
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<TaskExecution>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayTaskOutcome {
    pub name: String,
    pub status: StepStatus,
    pub execution_tasks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub blocked: usize,
}

impl RunSummary {
    fn from_tasks(tasks: &[TaskOutcome]) -> Self {
        let mut summary = Self {
            total: tasks.len(),
            ..Self::default()
        };
        for task in tasks {
            match task.status {
                StepStatus::Success => summary.succeeded += 1,
                StepStatus::Failed => summary.failed += 1,
                StepStatus::Skipped => summary.skipped += 1,
                StepStatus::Blocked => summary.blocked += 1,
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub variant: String,
    pub requester: Requester,
    pub is_patch: bool,
    pub work_dir: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub summary: RunSummary,
    pub tasks: Vec<TaskOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display_tasks: Vec<DisplayTaskOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestResultsSummary>,
}

impl RunReport {
    pub fn task(&self, name: &str) -> Option<&TaskOutcome> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn display_task(&self, name: &str) -> Option<&DisplayTaskOutcome> {
        self.display_tasks.iter().find(|t| t.name == name)
    }

    /// 1 when any task failed. Skips, and blocks that stem from skips, exit 0.
    pub fn exit_code(&self) -> i32 {
        if self.summary.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Display task status from its execution tasks.
pub fn display_status(statuses: &[StepStatus]) -> StepStatus {
    if statuses.contains(&StepStatus::Failed) {
        StepStatus::Failed
    } else if !statuses.is_empty() && statuses.iter().all(|s| *s == StepStatus::Success) {
        StepStatus::Success
    } else if statuses.contains(&StepStatus::Blocked) {
        StepStatus::Blocked
    } else {
        StepStatus::Skipped
    }
}

struct TaskRunner {
    descriptor: Descriptor,
    variant: BuildVariant,
    context: RunContext,
}

impl TaskRunner {
    fn run_task(&self, name: &str) -> (StepStatus, TaskExecution) {
        let started_at = Utc::now();
        let clock = Instant::now();
        log_status!("run", "Task '{}' started", name);

        let mut execution = TaskExecution {
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            blocks: Vec::new(),
            reports: Vec::new(),
            test_results: None,
            error: None,
        };

        let Some(task) = self.descriptor.task(name) else {
            execution.error = Some(Error::task_not_found(name, None).message);
            return (StepStatus::Failed, execution);
        };

        let env = ExecEnv {
            work_dir: self.context.work_dir.clone(),
            source_root: self.context.source_root.clone(),
            shell: self.context.shell.clone(),
        };
        let runner = BlockRunner {
            descriptor: &self.descriptor,
            env: &env,
            task: name,
        };
        let mut expansions = self.context.task_expansions(&self.variant, name);

        let pre = runner.run(
            Block::Pre,
            &self.descriptor.pre,
            &mut expansions,
            HookFailureMode::from_flag(self.descriptor.pre_error_fails_task),
        );
        let skip_main = pre.fails_task;
        execution.blocks.push(pre);

        if !skip_main {
            let main = runner.run(
                Block::Main,
                &task.commands,
                &mut expansions,
                HookFailureMode::Fatal,
            );
            execution.blocks.push(main);
        }

        let post = runner.run(
            Block::Post,
            &self.descriptor.post,
            &mut expansions,
            HookFailureMode::from_flag(self.descriptor.post_error_fails_task),
        );
        execution.blocks.push(post);

        let failed = execution.blocks.iter().any(|b| b.fails_task);
        for block in &mut execution.blocks {
            execution.reports.append(&mut block.reports);
        }
        if !execution.reports.is_empty() {
            execution.test_results = Some(TestResultsSummary::from_reports(&execution.reports));
        }

        execution.finished_at = Utc::now();
        execution.duration_ms = clock.elapsed().as_millis() as u64;

        let status = if failed {
            StepStatus::Failed
        } else {
            StepStatus::Success
        };
        log_status!("run", "Task '{}' {}", name, status.as_str());
        (status, execution)
    }
}

impl PipelineStepExecutor<TaskExecution> for TaskRunner {
    fn execute_step(&self, step: &PipelineStep) -> (StepStatus, TaskExecution) {
        self.run_task(&step.id)
    }
}

/// Execute a plan. Task failures are reported, not returned as errors.
pub fn run(descriptor: &Descriptor, plan: &Plan, context: &RunContext) -> Result<RunReport> {
    let variant = descriptor.resolve_variant(Some(&plan.variant))?;
    fs::create_dir_all(&context.work_dir).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!("create work dir {}", context.work_dir.display())),
        )
    })?;

    let started_at = Utc::now();
    log_status!(
        "run",
        "Running {} task(s) on '{}' ({})",
        plan.tasks.len(),
        plan.variant,
        context.requester.as_str()
    );

    let runner = Arc::new(TaskRunner {
        descriptor: descriptor.clone(),
        variant: variant.clone(),
        context: context.clone(),
    });
    let field = format!("buildvariants.{}", plan.variant);
    let results = pipeline::run(&plan.steps(), runner, context.jobs, &field)?;

    let mut by_name: HashMap<String, StepResult<TaskExecution>> =
        results.into_iter().map(|r| (r.id.clone(), r)).collect();

    let tasks: Vec<TaskOutcome> = plan
        .tasks
        .iter()
        .filter_map(|planned| {
            let result = by_name.remove(&planned.name)?;
            Some(TaskOutcome {
                name: planned.name.clone(),
                status: result.status,
                reason: result.reason,
                display_task: planned.display_task.clone(),
                execution: result.detail,
            })
        })
        .collect();

    let display_tasks = plan
        .display_tasks
        .iter()
        .map(|display| {
            let statuses: Vec<StepStatus> = display
                .execution_tasks
                .iter()
                .filter_map(|name| tasks.iter().find(|t| &t.name == name))
                .map(|t| t.status)
                .collect();
            DisplayTaskOutcome {
                name: display.name.clone(),
                status: display_status(&statuses),
                execution_tasks: display.execution_tasks.clone(),
            }
        })
        .collect();

    let reports: Vec<TestReport> = tasks
        .iter()
        .filter_map(|t| t.execution.as_ref())
        .flat_map(|e| e.reports.iter().cloned())
        .collect();
    let test_results = (!reports.is_empty()).then(|| TestResultsSummary::from_reports(&reports));

    let summary = RunSummary::from_tasks(&tasks);
    log_status!(
        "run",
        "Done: {} succeeded, {} failed, {} skipped, {} blocked",
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.blocked
    );

    Ok(RunReport {
        run_id: context.run_id.clone(),
        variant: plan.variant.clone(),
        requester: context.requester,
        is_patch: context.is_patch(),
        work_dir: context.work_dir.display().to_string(),
        started_at,
        finished_at: Utc::now(),
        success: summary.failed == 0,
        summary,
        tasks,
        display_tasks,
        test_results,
    })
}

/// Plan and run in one step.
pub fn execute(
    descriptor: &Descriptor,
    variant: Option<&str>,
    context: &RunContext,
    selection: &[String],
) -> Result<RunReport> {
    let plan = plan::plan(descriptor, variant, context, selection)?;
    run(descriptor, &plan, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_str;

    #[test]
    fn display_status_rules() {
        use StepStatus::*;
        assert_eq!(display_status(&[Success, Failed, Blocked]), Failed);
        assert_eq!(display_status(&[Success, Success]), Success);
        assert_eq!(display_status(&[Success, Blocked, Skipped]), Blocked);
        assert_eq!(display_status(&[Success, Skipped]), Skipped);
        assert_eq!(display_status(&[]), Skipped);
    }

    const DESCRIPTOR: &str = r#"
pre_error_fails_task: true
pre:
  - command: shell.exec
    params: { script: "echo ${task_name} >> pre.log" }
post:
  - command: shell.exec
    params: { script: "echo ${task_name} >> post.log" }
tasks:
  - name: lint
    commands:
      - command: shell.exec
        params: { script: "exit 1" }
  - name: test
    commands:
      - command: shell.exec
        params: { script: "touch tested" }
  - name: publish
    patchable: false
    depends_on: [test]
    commands:
      - command: shell.exec
        params: { script: "touch published" }
  - name: release
    depends_on: [lint, publish]
    commands:
      - command: shell.exec
        params: { script: "touch released" }
buildvariants:
  - name: linux
    tasks: [lint, test, publish, release]
    display_tasks:
      - name: checks
        execution_tasks: [lint, test]
"#;

    #[test]
    fn failures_block_dependents_and_post_always_runs() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let context = RunContext::new(dir.path(), dir.path());

        let report = execute(&descriptor, None, &context, &[]).unwrap();
        assert_eq!(report.task("lint").unwrap().status, StepStatus::Failed);
        assert_eq!(report.task("test").unwrap().status, StepStatus::Success);
        assert_eq!(report.task("publish").unwrap().status, StepStatus::Success);
        assert_eq!(report.task("release").unwrap().status, StepStatus::Blocked);
        assert_eq!(report.display_task("checks").unwrap().status, StepStatus::Failed);
        assert_eq!(report.exit_code(), 1);
        assert!(!dir.path().join("released").exists());

        let post_log = std::fs::read_to_string(dir.path().join("post.log")).unwrap();
        assert!(post_log.lines().any(|l| l == "lint"));
        assert_eq!(post_log.lines().count(), 3);
    }

    #[test]
    fn patch_run_skips_non_patchable_and_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = parse_str(DESCRIPTOR, "t.yml").unwrap();
        let context =
            RunContext::new(dir.path(), dir.path()).with_requester(Requester::PatchRequest);

        let report = execute(&descriptor, None, &context, &["publish".to_string()]).unwrap();
        assert_eq!(report.task("test").unwrap().status, StepStatus::Success);
        let publish = report.task("publish").unwrap();
        assert_eq!(publish.status, StepStatus::Skipped);
        assert!(publish.execution.is_none());
        assert_eq!(report.exit_code(), 0);
        assert!(report.success);
        assert!(!dir.path().join("published").exists());
    }

    #[test]
    fn fatal_pre_failure_skips_task_commands_but_runs_post() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = DESCRIPTOR.replace("echo ${task_name} >> pre.log", "exit 3");
        let descriptor = parse_str(&yaml, "t.yml").unwrap();
        let context = RunContext::new(dir.path(), dir.path());

        let report = execute(&descriptor, None, &context, &["test".to_string()]).unwrap();
        let test = report.task("test").unwrap();
        assert_eq!(test.status, StepStatus::Failed);
        let execution = test.execution.as_ref().unwrap();
        assert!(execution.block(Block::Main).is_none());
        assert!(execution.block(Block::Post).unwrap().all_succeeded);
        assert!(!dir.path().join("tested").exists());
        assert!(dir.path().join("post.log").exists());
    }
}
