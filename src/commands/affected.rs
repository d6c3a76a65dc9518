use clap::Args;
use serde::Serialize;

use deploy_dispatcher::changes::{self, TriggerReason};

use super::{ChangeSourceArgs, CmdResult, GlobalArgs};

#[derive(Args)]
pub struct AffectedArgs {
    #[command(flatten)]
    pub changes: ChangeSourceArgs,
}

#[derive(Serialize)]
pub struct AffectedTarget {
    pub name: String,
    pub source_path: String,
    pub workspace_id: String,
    pub reason: TriggerReason,
    pub matched_path: String,
}

#[derive(Serialize)]
pub struct AffectedOutput {
    pub command: String,
    pub config: String,
    pub changed_paths: Vec<String>,
    pub affected: Vec<AffectedTarget>,
}

pub fn run(args: AffectedArgs, global: &GlobalArgs) -> CmdResult<AffectedOutput> {
    let (config_path, registry) = global.load_registry()?;
    let change_set = args.changes.load()?;

    let affected = changes::detect(
        &registry.targets,
        &change_set,
        registry.workflow_path.as_deref(),
    )
    .into_iter()
    .map(|d| AffectedTarget {
        name: d.target.name,
        source_path: d.target.source_path,
        workspace_id: d.target.workspace_id,
        reason: d.reason,
        matched_path: d.matched_path,
    })
    .collect();

    Ok((
        AffectedOutput {
            command: "affected".to_string(),
            config: config_path.to_string_lossy().to_string(),
            changed_paths: change_set.paths().to_vec(),
            affected,
        },
        0,
    ))
}
