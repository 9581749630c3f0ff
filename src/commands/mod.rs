use std::path::{Path, PathBuf};

use clap::Args;

use evgpipe::context::{Requester, RunContext};
use evgpipe::defaults::Defaults;
use evgpipe::descriptor::{self, Descriptor};
use evgpipe::expansions;

pub type CmdResult<T> = evgpipe::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub defaults: Defaults,
}

/// Descriptor file argument shared by every command.
#[derive(Args, Debug, Default)]
pub struct DescriptorArgs {
    /// Descriptor file (defaults to the configured descriptor, evergreen.yml)
    pub file: Option<PathBuf>,
}

/// Which variant and run context a command plans for.
#[derive(Args, Debug, Default)]
pub struct SelectionArgs {
    /// Build variant (defaults to the first declared variant)
    #[arg(long, short = 'v')]
    pub variant: Option<String>,

    /// Treat the run as a patch build (same as --requester patch_request)
    #[arg(long, conflicts_with = "requester")]
    pub patch: bool,

    /// Requester: patch_request, gitter_request, github_pull_request, merge_test, ad_hoc, trigger_request
    #[arg(long)]
    pub requester: Option<String>,

    /// Task name or glob to run (repeatable); dependencies are included
    #[arg(long = "task", short = 't')]
    pub tasks: Vec<String>,

    /// Revision exposed as the ${revision} expansion
    #[arg(long)]
    pub revision: Option<String>,
}

/// Load the descriptor named on the command line or in config.
pub(crate) fn load_descriptor(
    args: &DescriptorArgs,
    global: &GlobalArgs,
) -> evgpipe::Result<(PathBuf, Descriptor)> {
    let path = args
        .file
        .clone()
        .unwrap_or_else(|| global.defaults.descriptor_path());
    let descriptor = descriptor::load(&path)?;
    Ok((path, descriptor))
}

/// Requester from flags; an `is_patch=true` expansion implies a patch request.
pub(crate) fn resolve_requester(
    selection: &SelectionArgs,
    user_expansions: &expansions::Expansions,
) -> evgpipe::Result<Requester> {
    if selection.patch {
        return Ok(Requester::PatchRequest);
    }
    if let Some(raw) = &selection.requester {
        return Requester::parse(raw);
    }
    if user_expansions.get("is_patch") == Some("true") {
        return Ok(Requester::PatchRequest);
    }
    Ok(Requester::default())
}

/// Source tree next to the descriptor unless given explicitly.
pub(crate) fn source_root(descriptor_path: &Path, explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    match descriptor_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Context for commands that only plan: no work dir is touched.
pub(crate) fn planning_context(
    selection: &SelectionArgs,
    descriptor_path: &Path,
) -> evgpipe::Result<RunContext> {
    let requester = resolve_requester(selection, &expansions::Expansions::new())?;
    let mut context = RunContext::new(
        std::env::temp_dir(),
        source_root(descriptor_path, None),
    )
    .with_requester(requester);
    context.revision = selection.revision.clone();
    Ok(context)
}

pub mod list;
pub mod plan;
pub mod run;
pub mod validate;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (evgpipe::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Validate(args) => dispatch!(args, global, validate),
        crate::Commands::List(args) => dispatch!(args, global, list),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Run(args) => {
            crate::tty::status("evgpipe is running tasks...");
            dispatch!(args, global, run)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_patch_expansion_implies_patch_requester() {
        let mut exp = expansions::Expansions::new();
        let selection = SelectionArgs::default();
        assert_eq!(
            resolve_requester(&selection, &exp).unwrap(),
            Requester::GitterRequest
        );

        exp.put("is_patch", "true");
        assert_eq!(
            resolve_requester(&selection, &exp).unwrap(),
            Requester::PatchRequest
        );

        let explicit = SelectionArgs {
            requester: Some("ad_hoc".to_string()),
            ..SelectionArgs::default()
        };
        assert_eq!(resolve_requester(&explicit, &exp).unwrap(), Requester::AdHoc);
    }

    #[test]
    fn source_root_defaults_to_descriptor_dir() {
        assert_eq!(
            source_root(Path::new("repo/evergreen.yml"), None),
            PathBuf::from("repo")
        );
        assert_eq!(source_root(Path::new("evergreen.yml"), None), PathBuf::from("."));
        assert_eq!(
            source_root(Path::new("repo/evergreen.yml"), Some(Path::new("/src"))),
            PathBuf::from("/src")
        );
    }
}
