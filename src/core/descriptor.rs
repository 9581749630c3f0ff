//! Pipeline descriptor model and YAML loading.
//!
//! The descriptor follows the Evergreen project-config dialect:
//!
//! ```yaml
//! functions:
//!   "create virtualenv":
//!     - command: shell.exec
//!       params: { script: "virtualenv venv" }
//! pre:
//!   - func: "create virtualenv"
//! tasks:
//!   - name: unit_tests
//!     commands:
//!       - command: shell.exec
//!         params: { script: "tox" }
//! buildvariants:
//!   - name: ubuntu
//!     tasks: [{ name: unit_tests }]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub functions: BTreeMap<String, FunctionBody>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<Command>,
    #[serde(default)]
    pub pre_error_fails_task: bool,
    #[serde(default)]
    pub post_error_fails_task: bool,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub buildvariants: Vec<BuildVariant>,
}

/// A function body is either a single command or a list of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionBody {
    Many(Vec<Command>),
    One(Command),
}

impl FunctionBody {
    pub fn commands(&self) -> &[Command] {
        match self {
            FunctionBody::Many(commands) => commands,
            FunctionBody::One(command) => std::slice::from_ref(command),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_err: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind<'a> {
    Func(&'a str),
    Builtin(&'a str),
    /// Neither or both of `func` / `command` were given.
    Invalid,
}

impl Command {
    pub fn shell(script: impl Into<String>) -> Self {
        let mut params = BTreeMap::new();
        params.insert("script".to_string(), Value::String(script.into()));
        Self {
            command: Some("shell.exec".to_string()),
            params,
            ..Self::default()
        }
    }

    pub fn func(name: impl Into<String>) -> Self {
        Self {
            func: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> CommandKind<'_> {
        match (self.func.as_deref(), self.command.as_deref()) {
            (Some(func), None) => CommandKind::Func(func),
            (None, Some(command)) => CommandKind::Builtin(command),
            _ => CommandKind::Invalid,
        }
    }

    /// Label used in results and progress output.
    pub fn label(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        match self.kind() {
            CommandKind::Func(name) => format!("func '{}'", name),
            CommandKind::Builtin(name) => name.to_string(),
            CommandKind::Invalid => "<invalid command>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<TaskRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patchable: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub patch_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Task {
    /// Tasks are patchable unless they opt out.
    pub fn is_patchable(&self) -> bool {
        self.patchable.unwrap_or(true)
    }

    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.depends_on.iter().map(|d| d.name.as_str())
    }

    /// Names of functions invoked directly by this task's commands.
    pub fn function_calls(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c.kind() {
            CommandKind::Func(name) => Some(name),
            _ => None,
        })
    }
}

/// Reference to a task by name. Accepts `name` or `{ name: name }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTaskRef")]
pub struct TaskRef {
    pub name: String,
}

impl TaskRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTaskRef {
    Bare(String),
    Named { name: String },
}

impl From<RawTaskRef> for TaskRef {
    fn from(raw: RawTaskRef) -> Self {
        match raw {
            RawTaskRef::Bare(name) | RawTaskRef::Named { name } => TaskRef { name },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildVariant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub run_on: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expansions: BTreeMap<String, Value>,
    #[serde(default)]
    pub tasks: Vec<TaskRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub display_tasks: Vec<DisplayTask>,
}

impl BuildVariant {
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn schedules(&self, task: &str) -> bool {
        self.tasks.iter().any(|t| t.name == task)
    }

    pub fn title(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTask {
    pub name: String,
    #[serde(default)]
    pub execution_tasks: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

impl Descriptor {
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&[Command]> {
        self.functions.get(name).map(FunctionBody::commands)
    }

    pub fn variant(&self, name: &str) -> Option<&BuildVariant> {
        self.buildvariants.iter().find(|v| v.name == name)
    }

    /// Resolve an explicit variant name, or fall back to the only/first variant.
    pub fn resolve_variant(&self, name: Option<&str>) -> Result<&BuildVariant> {
        match name {
            Some(name) => self
                .variant(name)
                .ok_or_else(|| Error::variant_not_found(name)),
            None => self.buildvariants.first().ok_or_else(|| {
                Error::validation_invalid_argument(
                    "buildvariants",
                    "Descriptor declares no build variants",
                    None,
                    None,
                )
            }),
        }
    }

    /// Display task that lists `task` as an execution task on `variant`, if any.
    pub fn display_task_for<'a>(&'a self, variant: &'a BuildVariant, task: &str) -> Option<&'a str> {
        variant
            .display_tasks
            .iter()
            .find(|d| d.execution_tasks.iter().any(|t| t == task))
            .map(|d| d.name.as_str())
    }
}

/// Load a descriptor from a YAML file.
pub fn load(path: &Path) -> Result<Descriptor> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_str(&content, &path.display().to_string())
}

/// Parse descriptor YAML. `source` names the document in error details.
pub fn parse_str(content: &str, source: &str) -> Result<Descriptor> {
    if content.trim().is_empty() {
        return Ok(Descriptor::default());
    }

    serde_yml::from_str(content).map_err(|e| Error::config_invalid_yaml(source, e))
}
