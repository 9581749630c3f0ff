use clap::Args;
use serde::Serialize;

use evgpipe::descriptor::{Descriptor, DisplayTask};
use evgpipe::validate;

use super::{CmdResult, DescriptorArgs};

#[derive(Args)]
pub struct ListArgs {
    #[command(flatten)]
    pub descriptor: DescriptorArgs,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantEntry {
    pub name: String,
    pub display_name: String,
    pub run_on: Vec<String>,
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub display_tasks: Vec<DisplayTask>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEntry {
    pub name: String,
    pub patchable: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub patch_only: bool,
    pub depends_on: Vec<String>,
    pub functions: Vec<String>,
    pub commands: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOutput {
    pub command: String,
    pub descriptor: String,
    pub variants: Vec<VariantEntry>,
    pub tasks: Vec<TaskEntry>,
    pub functions: Vec<String>,
}

pub fn run(args: ListArgs, global: &super::GlobalArgs) -> CmdResult<ListOutput> {
    let (path, descriptor) = super::load_descriptor(&args.descriptor, global)?;

    Ok((
        ListOutput {
            command: "list".to_string(),
            descriptor: path.display().to_string(),
            variants: variants(&descriptor),
            tasks: tasks(&descriptor),
            functions: descriptor.functions.keys().cloned().collect(),
        },
        0,
    ))
}

fn variants(descriptor: &Descriptor) -> Vec<VariantEntry> {
    descriptor
        .buildvariants
        .iter()
        .map(|v| VariantEntry {
            name: v.name.clone(),
            display_name: v.title().to_string(),
            run_on: v.run_on.clone(),
            tasks: v.task_names().into_iter().map(str::to_string).collect(),
            display_tasks: v.display_tasks.clone(),
        })
        .collect()
}

fn tasks(descriptor: &Descriptor) -> Vec<TaskEntry> {
    descriptor
        .tasks
        .iter()
        .map(|t| TaskEntry {
            name: t.name.clone(),
            patchable: t.is_patchable(),
            patch_only: t.patch_only,
            depends_on: t.dependency_names().map(str::to_string).collect(),
            functions: validate::functions_used_by(descriptor, &t.name),
            commands: t.commands.len(),
        })
        .collect()
}
