use clap::Args;
use serde::Serialize;

use deploy_dispatcher::secrets::{SecretStore, SystemSecretStore};

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct TargetsArgs {
    /// Check that every credential reference resolves (values are never shown)
    #[arg(long)]
    pub check_credentials: bool,
}

#[derive(Serialize)]
pub struct TargetEntry {
    pub name: String,
    pub source_path: String,
    pub workspace_id: String,
    pub credential_ref: String,
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_resolved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_error: Option<String>,
}

#[derive(Serialize)]
pub struct TargetsOutput {
    pub command: String,
    pub config: String,
    pub concurrency: usize,
    pub publish_program: String,
    pub targets: Vec<TargetEntry>,
}

pub fn run(args: TargetsArgs, global: &GlobalArgs) -> CmdResult<TargetsOutput> {
    let (config_path, registry) = global.load_registry()?;
    let store = SystemSecretStore;

    let mut unresolved = 0;
    let targets = registry
        .targets
        .iter()
        .map(|target| {
            let (credential_resolved, credential_error) = if args.check_credentials {
                match store.resolve(&target.credential_ref) {
                    Ok(_) => (Some(true), None),
                    Err(e) => {
                        unresolved += 1;
                        (Some(false), Some(e.message))
                    }
                }
            } else {
                (None, None)
            };

            TargetEntry {
                name: target.name.clone(),
                source_path: target.source_path.clone(),
                workspace_id: target.workspace_id.clone(),
                credential_ref: target.credential_ref.clone(),
                timeout_secs: registry.timeout_for(target).as_secs(),
                workflow_path: target.workflow_path.clone(),
                credential_resolved,
                credential_error,
            }
        })
        .collect();

    let exit_code = if unresolved > 0 { 1 } else { 0 };

    Ok((
        TargetsOutput {
            command: "targets".to_string(),
            config: config_path.to_string_lossy().to_string(),
            concurrency: registry.concurrency,
            publish_program: registry.publish.program.clone(),
            targets,
        },
        exit_code,
    ))
}
