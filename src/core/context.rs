//! Run context: who requested the run and the expansions it carries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expansions::{keys, Expansions};

/// What triggered a run. Patch requesters are unmerged proposed changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Requester {
    PatchRequest,
    #[default]
    GitterRequest,
    GithubPullRequest,
    MergeTest,
    AdHoc,
    TriggerRequest,
}

impl Requester {
    pub const ALL: [Requester; 6] = [
        Requester::PatchRequest,
        Requester::GitterRequest,
        Requester::GithubPullRequest,
        Requester::MergeTest,
        Requester::AdHoc,
        Requester::TriggerRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Requester::PatchRequest => "patch_request",
            Requester::GitterRequest => "gitter_request",
            Requester::GithubPullRequest => "github_pull_request",
            Requester::MergeTest => "merge_test",
            Requester::AdHoc => "ad_hoc",
            Requester::TriggerRequest => "trigger_request",
        }
    }

    pub fn is_patch(&self) -> bool {
        matches!(
            self,
            Requester::PatchRequest | Requester::GithubPullRequest | Requester::MergeTest
        )
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_lowercase();
        let alias = match normalized.as_str() {
            "patch" => Some(Requester::PatchRequest),
            "mainline" | "commit" => Some(Requester::GitterRequest),
            "adhoc" => Some(Requester::AdHoc),
            "trigger" => Some(Requester::TriggerRequest),
            _ => None,
        };

        alias
            .or_else(|| Self::ALL.into_iter().find(|r| r.as_str() == normalized))
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "requester",
                    format!("Unknown requester '{}'", raw),
                    None,
                    Some(Self::ALL.iter().map(|r| r.as_str().to_string()).collect()),
                )
            })
    }
}

/// Everything a run needs besides the descriptor.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub requester: Requester,
    pub revision: Option<String>,
    /// Directory shared by every task of the run.
    pub work_dir: PathBuf,
    /// Source tree materialized by `git.get_project`.
    pub source_root: PathBuf,
    /// User-supplied expansions (file + flags), before built-ins.
    pub expansions: Expansions,
    pub shell: String,
    pub jobs: usize,
}

impl RunContext {
    pub fn new(work_dir: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            requester: Requester::default(),
            revision: None,
            work_dir: work_dir.into(),
            source_root: source_root.into(),
            expansions: Expansions::new(),
            shell: "sh".to_string(),
            jobs: 1,
        }
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = requester;
        self
    }

    pub fn is_patch(&self) -> bool {
        self.requester.is_patch()
    }

    /// Expansions for one task: built-ins, then user values, then variant values.
    ///
    /// `is_patch` is only defined for patch runs, matching the CI engine.
    pub fn task_expansions(&self, variant: &crate::descriptor::BuildVariant, task: &str) -> Expansions {
        let mut exp = Expansions::new();
        exp.put(keys::WORKDIR, self.work_dir.display().to_string());
        exp.put(keys::TASK_NAME, task);
        exp.put(keys::BUILD_VARIANT, variant.name.clone());
        exp.put(keys::REQUESTER, self.requester.as_str());
        exp.put(keys::RUN_ID, self.run_id.clone());
        if let Some(revision) = &self.revision {
            exp.put(keys::REVISION, revision.clone());
        }
        if self.is_patch() {
            exp.put(keys::IS_PATCH, "true");
        }

        exp.extend(self.expansions.as_map().clone());
        exp.extend_values(&variant.expansions);
        exp
    }
}
