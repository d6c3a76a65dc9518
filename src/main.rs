use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Raw(RawOutputMode),
}

#[derive(Debug, Clone, Copy)]
enum RawOutputMode {
    Summary,
}

mod commands;
mod output;
mod tty;

use commands::{affected, run, targets};
use deploy_dispatcher::config::CONFIG_ENV;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deploy-dispatcher")]
#[command(version = VERSION)]
#[command(about = "Publish the pipeline directories touched by a push to their workspaces")]
struct Cli {
    /// Target registry file (.toml, .json, .yaml)
    #[arg(long, global = true, env = CONFIG_ENV, value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect affected targets and publish each one
    Run(run::RunArgs),
    /// Show which targets a set of changes affects
    Affected(affected::AffectedArgs),
    /// List the registry's targets
    #[command(visible_alias = "list-targets")]
    Targets(targets::TargetsArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Run(args) if !args.json => ResponseMode::Raw(RawOutputMode::Summary),
        _ => ResponseMode::Json,
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { config: cli.config };

    match response_mode(&cli.command) {
        ResponseMode::Raw(RawOutputMode::Summary) => {
            match commands::run_summary(cli.command, &global) {
                Ok((summary, exit_code)) => {
                    let _ = output::print_summary(&summary);
                    std::process::ExitCode::from(exit_code_to_u8(exit_code))
                }
                Err(err) => {
                    output::print_error_text(&err);
                    let exit_code = output::exit_code_for_error(err.code);
                    std::process::ExitCode::from(exit_code_to_u8(exit_code))
                }
            }
        }
        ResponseMode::Json => {
            let (json_result, exit_code) = commands::run_json(cli.command, &global);
            let _ = output::print_json_result(json_result);
            std::process::ExitCode::from(exit_code_to_u8(exit_code))
        }
    }
}

/// Negative codes (a timed-out publish reports -1) still fail the job.
fn exit_code_to_u8(code: i32) -> u8 {
    if code < 0 {
        1
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
