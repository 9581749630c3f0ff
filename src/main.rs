use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{list, plan, run, validate};
use output::OutputFormat;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "evgpipe")]
#[command(version = VERSION)]
#[command(about = "Validate, plan and locally run Evergreen-style CI pipeline descriptors")]
struct Cli {
    /// Output format for the response envelope
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a descriptor for consistency problems
    Validate(validate::ValidateArgs),
    /// List build variants, tasks and functions
    List(list::ListArgs),
    /// Show the ordered, gated task plan for a variant
    Plan(plan::PlanArgs),
    /// Run a variant's tasks locally
    Run(run::RunArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let defaults = match evgpipe::defaults::load_defaults() {
        Ok(defaults) => defaults,
        Err(err) => {
            let exit_code = output::exit_code_for_error(err.code);
            if output::print_result::<()>(Err(err), cli.output).is_err() {
                return std::process::ExitCode::from(1);
            }
            return std::process::ExitCode::from(exit_code_to_u8(exit_code));
        }
    };
    let global = GlobalArgs { defaults };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if output::print_result(json_result, cli.output).is_err() {
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
