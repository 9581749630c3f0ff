use clap::Args;
use serde::Serialize;

use evgpipe::validate::{self, ValidationReport};

use super::{CmdResult, DescriptorArgs};

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub descriptor: DescriptorArgs,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutput {
    pub command: String,
    pub descriptor: String,
    #[serde(flatten)]
    pub report: ValidationReport,
}

pub fn run(args: ValidateArgs, global: &super::GlobalArgs) -> CmdResult<ValidateOutput> {
    let (path, descriptor) = super::load_descriptor(&args.descriptor, global)?;
    let report = validate::validate(&descriptor);

    let failed = !report.valid || (args.strict && report.warning_count > 0);
    let exit_code = if failed { 2 } else { 0 };

    Ok((
        ValidateOutput {
            command: "validate".to_string(),
            descriptor: path.display().to_string(),
            report,
        },
        exit_code,
    ))
}
