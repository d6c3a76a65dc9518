//! Deployment targets and the registry loader.
//!
//! A target maps one source directory (or glob) in the repository to one
//! destination workspace. Targets are validated once at startup and never
//! change afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{RegistryConfig, MAX_DURATION_SECS};
use crate::error::{Error, Result};
use crate::utils::repo_path;

/// Target entry as written in the registry file. Every field is optional
/// here so that a missing field surfaces as a config error naming it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,
}

/// A validated deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
    /// Directory prefix or glob, as written in the registry.
    pub source_path: String,
    pub workspace_id: String,
    pub credential_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,
}

impl Target {
    /// Source path in the form used for matching changed paths.
    pub fn match_pattern(&self) -> String {
        repo_path::normalize(&self.source_path).unwrap_or_else(|_| self.source_path.clone())
    }
}

fn name_pattern() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("target name pattern is valid")
    })
}

fn required(value: &Option<String>, key: &str, label: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(Error::config_missing_key(key, Some(label.to_string()))),
    }
}

fn checked_path(raw: &str, key: String) -> Result<String> {
    repo_path::normalize(raw)
        .map(|_| raw.trim().to_string())
        .map_err(|problem| Error::config_invalid_value(key, Some(raw.to_string()), problem))
}

/// Validate the registry's target list, preserving declaration order.
pub fn load_targets(config: &RegistryConfig) -> Result<Vec<Target>> {
    let mut targets = Vec::with_capacity(config.targets.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, spec) in config.targets.iter().enumerate() {
        let position_label = format!("targets[{}]", index);
        let name = required(&spec.name, "name", &position_label)?;

        if !name_pattern().is_match(&name) {
            return Err(Error::config_invalid_value(
                format!("{}.name", position_label),
                Some(name),
                "names may only contain letters, digits, '.', '_' and '-'",
            ));
        }

        if let Some(&first_index) = seen.get(&name) {
            return Err(Error::config_duplicate_target(name, first_index, index));
        }

        let source_path = required(&spec.source_path, "source_path", &name)?;
        let source_path = checked_path(&source_path, format!("targets.{}.source_path", name))?;
        let workspace_id = required(&spec.workspace_id, "workspace_id", &name)?;
        let credential_ref = required(&spec.credential_ref, "credential_ref", &name)?;

        if spec.timeout_secs == Some(0) {
            return Err(Error::config_invalid_value(
                format!("targets.{}.timeout_secs", name),
                Some("0".to_string()),
                "timeout must be at least one second",
            ));
        }
        if let Some(secs) = spec.timeout_secs.filter(|&s| s > MAX_DURATION_SECS) {
            return Err(Error::config_invalid_value(
                format!("targets.{}.timeout_secs", name),
                Some(secs.to_string()),
                format!("timeout must not exceed {} seconds", MAX_DURATION_SECS),
            ));
        }

        let workflow_path = match spec.workflow_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Some(checked_path(
                path,
                format!("targets.{}.workflow_path", name),
            )?),
            _ => None,
        };

        seen.insert(name.clone(), index);
        targets.push(Target {
            name,
            source_path,
            workspace_id,
            credential_ref,
            timeout_secs: spec.timeout_secs,
            workflow_path,
        });
    }

    Ok(targets)
}
