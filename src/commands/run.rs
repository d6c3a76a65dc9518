use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use deploy_dispatcher::dispatch::{CancelToken, CommandPublisher, Dispatcher};
use deploy_dispatcher::log_status;
use deploy_dispatcher::provenance::{self, ProvenanceOverrides};
use deploy_dispatcher::run::{self, RunOptions, RunReport};
use deploy_dispatcher::secrets::SystemSecretStore;

use super::{ChangeSourceArgs, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub changes: ChangeSourceArgs,

    /// Version label passed to every publish (default: GITHUB_SHA or git HEAD)
    #[arg(long)]
    pub version_label: Option<String>,

    /// Provenance link passed to every publish (default: commit URL from CI env)
    #[arg(long)]
    pub provenance_url: Option<String>,

    /// Number of targets published at once (default: registry setting, 1)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Show what would be published without invoking the publish command
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the JSON envelope instead of the summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
pub struct RunOutput {
    pub command: String,
    pub config: String,
    #[serde(flatten)]
    pub report: RunReport,
}

/// Cancellation token tripped by SIGINT/SIGTERM.
fn install_cancel_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("[run] Cancellation requested, stopping in-flight publishes");
        handler_token.cancel();
    }) {
        log_status!("run", "Cancellation handler unavailable: {}", e);
    }
    cancel
}

fn execute(args: RunArgs, global: &GlobalArgs) -> deploy_dispatcher::Result<RunOutput> {
    let (config_path, registry) = global.load_registry()?;
    let changes = args.changes.load()?;

    let dispatcher = Dispatcher::new(
        &registry,
        Arc::new(CommandPublisher),
        Arc::new(SystemSecretStore),
        install_cancel_handler(),
    );

    let overrides = ProvenanceOverrides {
        version_label: args.version_label,
        provenance_url: args.provenance_url,
    };
    let repo = args.changes.repo.clone();
    let options = RunOptions {
        concurrency: args.concurrency,
        dry_run: args.dry_run,
    };

    let report = run::run(
        &registry,
        &changes,
        || provenance::resolve(&overrides, &repo),
        &dispatcher,
        &options,
    )?;

    Ok(RunOutput {
        command: "run".to_string(),
        config: config_path.to_string_lossy().to_string(),
        report,
    })
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    let output = execute(args, global)?;
    let exit_code = output.report.aggregate.exit_code;
    Ok((output, exit_code))
}

pub fn run_summary(args: RunArgs, global: &GlobalArgs) -> deploy_dispatcher::Result<(String, i32)> {
    let output = execute(args, global)?;
    let aggregate = &output.report.aggregate;

    if aggregate.total == 0 {
        log_status!("run", "No targets affected, nothing to publish");
    }

    Ok((aggregate.summary(), aggregate.exit_code))
}
