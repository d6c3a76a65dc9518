use std::path::Path;

use deploy_dispatcher::changes::{self, ChangeSet, TriggerReason};
use deploy_dispatcher::config::Registry;
use deploy_dispatcher::ErrorCode;

fn bundled_registry() -> Registry {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("deploy-dispatcher.toml");
    Registry::load(&path).unwrap()
}

#[test]
fn bundled_registry_is_valid() {
    let registry = bundled_registry();
    let names: Vec<&str> = registry.targets.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "validate-config",
            "create-xlsform",
            "create-cart-diagram",
            "create-config-template"
        ]
    );
    assert_eq!(registry.concurrency, 1);
}

#[test]
fn pipeline_change_affects_only_its_directory() {
    let registry = bundled_registry();
    let changes = ChangeSet::parse(["create-xlsform/pipeline.py"]).unwrap();

    let affected = changes::affected(&registry.targets, &changes);
    assert_eq!(affected.len(), 1);
    assert_eq!(affected[0].name, "create-xlsform");
}

#[test]
fn workflow_change_redeploys_everything() {
    let registry = bundled_registry();
    let changes = ChangeSet::parse([".github/workflows/deploy-pipelines.yml"]).unwrap();

    let detections = changes::detect(
        &registry.targets,
        &changes,
        registry.workflow_path.as_deref(),
    );
    assert_eq!(detections.len(), 4);
    assert!(detections
        .iter()
        .all(|d| d.reason == TriggerReason::SelfTrigger));
}

#[test]
fn yaml_registry_with_missing_field_names_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.yaml");
    std::fs::write(
        &path,
        "targets:\n  - name: alpha\n    source_path: alpha/\n    credential_ref: T\n",
    )
    .unwrap();

    let err = Registry::load(&path).unwrap_err();
    assert_eq!(err.code, ErrorCode::ConfigMissingKey);
    assert_eq!(err.details["key"], "workspace_id");
}
