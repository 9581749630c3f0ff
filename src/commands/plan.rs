use clap::Args;

use evgpipe::plan::{self, Plan};

use super::{CmdResult, DescriptorArgs, SelectionArgs};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub descriptor: DescriptorArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,
}

pub fn run(args: PlanArgs, global: &super::GlobalArgs) -> CmdResult<Plan> {
    let (path, descriptor) = super::load_descriptor(&args.descriptor, global)?;
    let context = super::planning_context(&args.selection, &path)?;

    let plan = plan::plan(
        &descriptor,
        args.selection.variant.as_deref(),
        &context,
        &args.selection.tasks,
    )?;
    Ok((plan, 0))
}
