use std::path::PathBuf;

use clap::Args;

use deploy_dispatcher::changes::ChangeSet;
use deploy_dispatcher::config::{self, Registry};
use deploy_dispatcher::utils::io;

pub type CmdResult<T> = deploy_dispatcher::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: Option<String>,
}

impl GlobalArgs {
    pub fn registry_path(&self) -> deploy_dispatcher::Result<PathBuf> {
        let raw = self.config.as_deref().unwrap_or(config::DEFAULT_CONFIG_FILE);
        config::resolve_config_path(raw)
    }

    pub fn load_registry(&self) -> deploy_dispatcher::Result<(PathBuf, Registry)> {
        let path = self.registry_path()?;
        let registry = Registry::load(&path).map_err(|e| {
            if e.code.is_config() {
                e.with_hint(format!(
                    "Pass --config <file> or set {} to point at the registry",
                    config::CONFIG_ENV
                ))
            } else {
                e
            }
        })?;
        Ok((path, registry))
    }
}

/// Where the changed paths of the triggering push come from.
///
/// Sources combine by union. At least one must be given.
#[derive(Args, Debug)]
pub struct ChangeSourceArgs {
    /// Changed file path (repeatable)
    #[arg(long = "changed", value_name = "PATH")]
    pub changed: Vec<String>,

    /// File listing changed paths, one per line ('-' for stdin)
    #[arg(long, value_name = "FILE")]
    pub changes_file: Option<String>,

    /// Diff this git revision against HEAD to find changed paths
    #[arg(long, value_name = "REF")]
    pub since: Option<String>,

    /// Repository checkout used for --since and git provenance
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub repo: String,
}

impl ChangeSourceArgs {
    pub fn load(&self) -> deploy_dispatcher::Result<ChangeSet> {
        if self.changed.is_empty() && self.changes_file.is_none() && self.since.is_none() {
            return Err(deploy_dispatcher::Error::validation_missing_argument(vec![
                "--changed".to_string(),
                "--changes-file".to_string(),
                "--since".to_string(),
            ])
            .with_hint("In GitHub Actions: --since ${{ github.event.before }}"));
        }

        let mut changes = ChangeSet::parse(&self.changed)?;

        if let Some(source) = &self.changes_file {
            let listing = io::read_file_or_stdin(source, "read changes file").map_err(|e| {
                deploy_dispatcher::Error::detection_source_failed(
                    e.details["error"].as_str().unwrap_or(&e.message).to_string(),
                    Some(source.clone()),
                )
            })?;
            changes = changes.merge(ChangeSet::parse_listing(&listing)?);
        }

        if let Some(base) = &self.since {
            let range = ChangeSet::from_git_range(&self.repo, base, "HEAD").map_err(|e| {
                if e.code.is_detection() {
                    e.with_hint("The checkout needs history back to --since (fetch-depth: 0)")
                } else {
                    e
                }
            })?;
            changes = changes.merge(range);
        }

        Ok(changes)
    }
}

pub mod affected;
pub mod run;
pub mod targets;

pub(crate) fn run_summary(
    command: crate::Commands,
    global: &GlobalArgs,
) -> deploy_dispatcher::Result<(String, i32)> {
    match command {
        crate::Commands::Run(args) => run::run_summary(args, global),
        _ => Err(deploy_dispatcher::Error::validation_invalid_argument(
            "output_mode",
            "Command does not support summary output",
            None,
            None,
        )),
    }
}

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (deploy_dispatcher::Result<serde_json::Value>, i32) {
    crate::tty::status("deploy-dispatcher is working...");

    match command {
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Affected(args) => dispatch!(args, global, affected),
        crate::Commands::Targets(args) => dispatch!(args, global, targets),
    }
}
