use std::path::PathBuf;

use clap::Args;

use evgpipe::context::RunContext;
use evgpipe::expansions::{self, Expansions};
use evgpipe::run::{self, RunReport};
use evgpipe::{paths, Error};

use super::{CmdResult, DescriptorArgs, SelectionArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub descriptor: DescriptorArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Expansion as KEY=VALUE (repeatable, overrides the expansions file)
    #[arg(long = "expansion", short = 'e', value_name = "KEY=VALUE")]
    pub expansions: Vec<String>,

    /// YAML file of expansions
    #[arg(long)]
    pub expansions_file: Option<PathBuf>,

    /// Working directory shared by all tasks
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Source tree for git.get_project (defaults to the descriptor's directory)
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Tasks to run in parallel
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Shell for shell.exec
    #[arg(long)]
    pub shell: Option<String>,
}

pub fn run(args: RunArgs, global: &super::GlobalArgs) -> CmdResult<RunReport> {
    let (path, descriptor) = super::load_descriptor(&args.descriptor, global)?;
    let context = build_context(&args, global, &path)?;

    let report = run::execute(
        &descriptor,
        args.selection.variant.as_deref(),
        &context,
        &args.selection.tasks,
    )?;
    let exit_code = report.exit_code();
    Ok((report, exit_code))
}

fn build_context(
    args: &RunArgs,
    global: &super::GlobalArgs,
    descriptor_path: &std::path::Path,
) -> evgpipe::Result<RunContext> {
    let defaults = &global.defaults;

    let mut user = Expansions::new();
    let file = args
        .expansions_file
        .clone()
        .or_else(|| defaults.expansions_file_path());
    if let Some(file) = file {
        user.extend(expansions::load_file(&file)?);
    }
    for raw in &args.expansions {
        let (key, value) = expansions::parse_assignment(raw)?;
        user.put(key, value);
    }

    let jobs = args.jobs.unwrap_or(defaults.jobs);
    if jobs == 0 {
        return Err(Error::validation_invalid_argument(
            "jobs",
            "--jobs must be at least 1",
            None,
            None,
        ));
    }

    let requester = super::resolve_requester(&args.selection, &user)?;
    let source = super::source_root(descriptor_path, args.source.as_deref());
    let cwd = std::env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("current dir".to_string())))?;

    let mut context = RunContext::new(PathBuf::new(), paths::resolve(&cwd, &source))
        .with_requester(requester);

    context.work_dir = match args.work_dir.clone().or_else(|| defaults.work_dir_path()) {
        Some(dir) => paths::resolve(&cwd, &dir),
        None => std::env::temp_dir().join(format!("evgpipe-{}", context.run_id)),
    };
    context.revision = args.selection.revision.clone();
    context.expansions = user;
    context.shell = args.shell.clone().unwrap_or_else(|| defaults.shell.clone());
    context.jobs = jobs;

    Ok(context)
}
