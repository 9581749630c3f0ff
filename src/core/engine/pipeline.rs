use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One schedulable unit: an id, the ids it waits on, and an optional skip gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, needs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            needs,
            skip: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Non-patchable task in a patch run.
    NotPatchable,
    /// Patch-only task in a mainline run.
    PatchOnly,
}

impl SkipReason {
    pub fn describe(&self) -> &'static str {
        match self {
            SkipReason::NotPatchable => "task is not patchable and this is a patch run",
            SkipReason::PatchOnly => "task only runs in patch builds",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
    Blocked,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Blocked => "blocked",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult<T> {
    pub id: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<T>,
}

impl<T> StepResult<T> {
    fn without_detail(id: &str, status: StepStatus, reason: String) -> Self {
        Self {
            id: id.to_string(),
            status,
            reason: Some(reason),
            detail: None,
        }
    }
}

pub trait PipelineStepExecutor<T>: Send + Sync {
    /// Execute a step whose dependencies all succeeded.
    fn execute_step(&self, step: &PipelineStep) -> (StepStatus, T);
}

/// Topologically order steps (Kahn), keeping declaration order among peers.
///
/// Fails on duplicate ids, unknown dependencies and cycles. `field` names the
/// descriptor location in error details.
pub fn order_steps(steps: &[PipelineStep], field: &str) -> Result<Vec<PipelineStep>> {
    let mut id_index = HashMap::new();
    for (idx, step) in steps.iter().enumerate() {
        if id_index.insert(step.id.clone(), idx).is_some() {
            return Err(Error::validation_invalid_argument(
                field,
                format!("Duplicate step id '{}'", step.id),
                Some(step.id.clone()),
                None,
            ));
        }
    }

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];

    for (idx, step) in steps.iter().enumerate() {
        for need in &step.needs {
            match id_index.get(need) {
                Some(&parent_idx) => {
                    indegree[idx] += 1;
                    dependents[parent_idx].push(idx);
                }
                None => {
                    return Err(Error::validation_invalid_argument(
                        field,
                        format!("Step '{}' depends on unknown step '{}'", step.id, need),
                        Some(step.id.clone()),
                        None,
                    ));
                }
            }
        }
    }

    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(idx, _)| idx)
        .collect();

    let mut ordered = Vec::with_capacity(steps.len());
    while let Some(idx) = queue.pop_front() {
        ordered.push(steps[idx].clone());
        for &child in &dependents[idx] {
            indegree[child] -= 1;
            if indegree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if ordered.len() != steps.len() {
        let pending: Vec<String> = steps
            .iter()
            .enumerate()
            .filter(|(idx, _)| indegree[*idx] > 0)
            .map(|(_, step)| step.id.clone())
            .collect();
        return Err(Error::validation_invalid_argument(
            field,
            format!("Dependency cycle between: {}", pending.join(", ")),
            None,
            Some(pending),
        ));
    }

    Ok(ordered)
}

/// Run steps in dependency order, up to `jobs` at a time.
///
/// Gated steps are skipped, steps whose dependencies did not succeed are
/// blocked. Results come back in completion order.
pub fn run<T: Send + 'static>(
    steps: &[PipelineStep],
    executor: Arc<dyn PipelineStepExecutor<T>>,
    jobs: usize,
    field: &str,
) -> Result<Vec<StepResult<T>>> {
    let ordered = order_steps(steps, field)?;
    let jobs = jobs.max(1);

    let mut results: Vec<StepResult<T>> = Vec::with_capacity(ordered.len());
    let mut pending = ordered;

    while !pending.is_empty() {
        let (ready, waiting, resolved) = split_ready_steps(&pending, &results);
        results.extend(resolved);

        if ready.is_empty() {
            if waiting.is_empty() {
                break;
            }
            return Err(Error::internal_unexpected(format!(
                "Steps blocked without progress: {}",
                waiting
                    .iter()
                    .map(|s| s.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        for batch in ready.chunks(jobs) {
            results.extend(execute_batch(batch, Arc::clone(&executor))?);
        }

        pending = waiting;
    }

    Ok(results)
}

/// Partition pending steps into runnable, still waiting, and resolved without running.
fn split_ready_steps<T>(
    pending: &[PipelineStep],
    results: &[StepResult<T>],
) -> (Vec<PipelineStep>, Vec<PipelineStep>, Vec<StepResult<T>>) {
    let mut ready = Vec::new();
    let mut waiting = Vec::new();
    let mut resolved = Vec::new();

    let mut status_map: HashMap<String, StepStatus> = results
        .iter()
        .map(|result| (result.id.clone(), result.status))
        .collect();

    for step in pending {
        if let Some(reason) = step.skip {
            status_map.insert(step.id.clone(), StepStatus::Skipped);
            resolved.push(StepResult::without_detail(
                &step.id,
                StepStatus::Skipped,
                reason.describe().to_string(),
            ));
            continue;
        }

        let mut unmet = false;
        let mut failed_dependency: Option<(String, StepStatus)> = None;

        for need in &step.needs {
            match status_map.get(need) {
                Some(StepStatus::Success) => {}
                Some(status) => {
                    failed_dependency = Some((need.clone(), *status));
                    break;
                }
                None => unmet = true,
            }
        }

        if let Some((dep, status)) = failed_dependency {
            status_map.insert(step.id.clone(), StepStatus::Blocked);
            resolved.push(StepResult::without_detail(
                &step.id,
                StepStatus::Blocked,
                format!("dependency '{}' did not succeed ({})", dep, status.as_str()),
            ));
            continue;
        }

        if unmet {
            waiting.push(step.clone());
        } else {
            ready.push(step.clone());
        }
    }

    (ready, waiting, resolved)
}

fn execute_batch<T: Send + 'static>(
    steps: &[PipelineStep],
    executor: Arc<dyn PipelineStepExecutor<T>>,
) -> Result<Vec<StepResult<T>>> {
    if let [step] = steps {
        return Ok(vec![execute_single_step(step, executor.as_ref())]);
    }

    use std::thread;

    let handles: Vec<_> = steps
        .iter()
        .map(|step| {
            let step = step.clone();
            let executor = Arc::clone(&executor);
            thread::spawn(move || execute_single_step(&step, executor.as_ref()))
        })
        .collect();

    let mut results = Vec::with_capacity(steps.len());
    for handle in handles {
        results.push(
            handle
                .join()
                .map_err(|_| Error::internal_unexpected("Step execution thread panicked"))?,
        );
    }

    Ok(results)
}

fn execute_single_step<T>(step: &PipelineStep, executor: &dyn PipelineStepExecutor<T>) -> StepResult<T> {
    let (status, detail) = executor.execute_step(step);
    StepResult {
        id: step.id.clone(),
        status,
        reason: None,
        detail: Some(detail),
    }
}
