//! Run planning for one build variant.
//!
//! A plan is the validated, dependency-ordered list of tasks a run will
//! attempt, with the patch gate already applied.

use std::collections::{BTreeSet, VecDeque};

use serde::Serialize;

use crate::context::{Requester, RunContext};
use crate::descriptor::{BuildVariant, Descriptor, DisplayTask};
use crate::engine::pipeline::{self, PipelineStep, SkipReason};
use crate::error::{Error, Result};
use crate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedStatus {
    Ready,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTask {
    pub name: String,
    pub status: PlannedStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_task: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub variant: String,
    pub variant_title: String,
    pub requester: Requester,
    pub is_patch: bool,
    pub tasks: Vec<PlannedTask>,
    pub display_tasks: Vec<DisplayTask>,
}

impl Plan {
    pub fn task(&self, name: &str) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Pipeline steps in plan order, gated tasks carrying their skip reason.
    pub fn steps(&self) -> Vec<PipelineStep> {
        self.tasks
            .iter()
            .map(|task| PipelineStep {
                id: task.name.clone(),
                needs: task.depends_on.clone(),
                skip: task.reason,
            })
            .collect()
    }
}

/// Decide whether a task is gated out of this run.
pub fn gate(patchable: bool, patch_only: bool, is_patch: bool) -> Option<SkipReason> {
    if is_patch && !patchable {
        Some(SkipReason::NotPatchable)
    } else if !is_patch && patch_only {
        Some(SkipReason::PatchOnly)
    } else {
        None
    }
}

/// Build the plan for `variant` (first variant when `None`).
///
/// `selection` holds task names or glob patterns; empty selects every task on
/// the variant. Selected tasks pull in their dependencies transitively.
pub fn plan(
    descriptor: &Descriptor,
    variant: Option<&str>,
    context: &RunContext,
    selection: &[String],
) -> Result<Plan> {
    validate::validate(descriptor).into_result()?;
    let variant = descriptor.resolve_variant(variant)?;
    let selected = select_tasks(descriptor, variant, selection)?;

    let steps: Vec<PipelineStep> = variant
        .tasks
        .iter()
        .filter(|t| selected.contains(t.name.as_str()))
        .filter_map(|t| descriptor.task(&t.name))
        .map(|task| {
            let mut needs = Vec::new();
            for dep in task.dependency_names() {
                if !needs.iter().any(|n: &String| n == dep) {
                    needs.push(dep.to_string());
                }
            }
            PipelineStep::new(task.name.clone(), needs)
        })
        .fold(Vec::new(), |mut acc: Vec<PipelineStep>, step| {
            if !acc.iter().any(|s| s.id == step.id) {
                acc.push(step);
            }
            acc
        });

    let ordered = pipeline::order_steps(&steps, &format!("buildvariants.{}", variant.name))?;
    let is_patch = context.is_patch();

    let tasks = ordered
        .into_iter()
        .filter_map(|step| {
            let task = descriptor.task(&step.id)?;
            let reason = gate(task.is_patchable(), task.patch_only, is_patch);
            Some(PlannedTask {
                status: if reason.is_some() {
                    PlannedStatus::Skipped
                } else {
                    PlannedStatus::Ready
                },
                reason,
                depends_on: step.needs,
                display_task: descriptor
                    .display_task_for(variant, &step.id)
                    .map(str::to_string),
                name: step.id,
            })
        })
        .collect();

    let display_tasks = variant
        .display_tasks
        .iter()
        .filter_map(|display| {
            let execution_tasks: Vec<String> = display
                .execution_tasks
                .iter()
                .filter(|t| selected.contains(t.as_str()))
                .cloned()
                .collect();
            (!execution_tasks.is_empty()).then(|| DisplayTask {
                name: display.name.clone(),
                execution_tasks,
            })
        })
        .collect();

    Ok(Plan {
        variant: variant.name.clone(),
        variant_title: variant.title().to_string(),
        requester: context.requester,
        is_patch,
        tasks,
        display_tasks,
    })
}

fn select_tasks<'a>(
    descriptor: &'a Descriptor,
    variant: &'a BuildVariant,
    selection: &[String],
) -> Result<BTreeSet<&'a str>> {
    let scheduled = variant.task_names();
    if selection.is_empty() {
        return Ok(scheduled.into_iter().collect());
    }

    let mut queue = VecDeque::new();
    for pattern in selection {
        let matches: Vec<&str> = scheduled
            .iter()
            .copied()
            .filter(|name| *name == pattern || glob_match::glob_match(pattern, name))
            .collect();
        if matches.is_empty() {
            return Err(Error::task_not_found(
                pattern.clone(),
                Some(format!("buildvariants.{}", variant.name)),
            ));
        }
        queue.extend(matches);
    }

    let mut selected = BTreeSet::new();
    while let Some(name) = queue.pop_front() {
        if !selected.insert(name) {
            continue;
        }
        if let Some(task) = descriptor.task(name) {
            queue.extend(task.dependency_names());
        }
    }
    Ok(selected)
}
