//! Registry file loading.
//!
//! The registry is a single JSON, TOML or YAML document holding the publish
//! command, pool settings and the ordered target list. It is read once at
//! startup and turned into an immutable [`Registry`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::target::{self, Target, TargetSpec};
use crate::utils::io;
use crate::utils::repo_path;
use crate::utils::template::{self, TemplateVars};

pub const DEFAULT_CONFIG_FILE: &str = "deploy-dispatcher.toml";
pub const CONFIG_ENV: &str = "DEPLOY_DISPATCHER_CONFIG";

/// Upper bound for every configured duration (one week).
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

// ============================================================================
// File model
// ============================================================================

/// External publish command. `args` entries are templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublishCommand {
    #[serde(default = "default_program")]
    pub program: String,

    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Environment variable the resolved credential is exported in.
    #[serde(default = "default_credential_env")]
    pub credential_env: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Extra environment for every publish invocation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for PublishCommand {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            credential_env: default_credential_env(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_program() -> String {
    "openhexa".to_string()
}

fn default_args() -> Vec<String> {
    [
        "pipelines",
        "push",
        "{{sourcePath}}",
        "--workspace",
        "{{workspaceId}}",
        "--version",
        "{{versionLabel}}",
        "--link",
        "{{provenanceUrl}}",
        "--yes",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_credential_env() -> String {
    "HEXA_TOKEN".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    1800
}

fn default_grace_period_secs() -> u64 {
    10
}

/// Root structure of the registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default)]
    pub publish: PublishCommand,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Changing this file redeploys every target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,

    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            publish: PublishCommand::default(),
            concurrency: default_concurrency(),
            default_timeout_secs: default_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
            workflow_path: None,
            targets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match ext.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            _ => Err(Error::config_invalid_value(
                "config",
                Some(path.display().to_string()),
                "registry file must end in .json, .toml, .yaml or .yml",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Yaml => "yaml",
        }
    }
}

impl RegistryConfig {
    pub fn parse(content: &str, format: ConfigFormat, origin: &str) -> Result<Self> {
        let parsed = match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yml::from_str(content).map_err(|e| e.to_string()),
        };

        parsed.map_err(|e| Error::config_parse_failed(origin, format.as_str(), e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = io::read_file(path, &format!("read registry {}", path.display()))
            .map_err(|e| {
                let problem = e.details["error"].as_str().unwrap_or(&e.message).to_string();
                Error::config_invalid_value("config", Some(path.display().to_string()), problem)
            })?;
        Self::parse(&content, format, &path.display().to_string())
    }
}

/// Expand `~` and environment variables in a user-supplied config path.
pub fn resolve_config_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw).map_err(|e| {
        Error::config_invalid_value("config", Some(raw.to_string()), e.to_string())
    })?;
    Ok(PathBuf::from(expanded.as_ref()))
}

// ============================================================================
// Validated registry
// ============================================================================

/// Immutable, validated registry. Created once per invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Registry {
    pub publish: PublishCommand,
    pub concurrency: usize,
    pub default_timeout_secs: u64,
    pub grace_period_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_path: Option<String>,
    pub targets: Vec<Target>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_config(RegistryConfig::load(path)?)
    }

    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        validate_publish(&config.publish)?;

        if config.concurrency == 0 {
            return Err(Error::config_invalid_value(
                "concurrency",
                Some("0".to_string()),
                "concurrency must be at least 1",
            ));
        }
        if config.default_timeout_secs == 0 {
            return Err(Error::config_invalid_value(
                "default_timeout_secs",
                Some("0".to_string()),
                "timeout must be at least one second",
            ));
        }
        if config.default_timeout_secs > MAX_DURATION_SECS {
            return Err(Error::config_invalid_value(
                "default_timeout_secs",
                Some(config.default_timeout_secs.to_string()),
                format!("timeout must not exceed {} seconds", MAX_DURATION_SECS),
            ));
        }
        if config.grace_period_secs > MAX_DURATION_SECS {
            return Err(Error::config_invalid_value(
                "grace_period_secs",
                Some(config.grace_period_secs.to_string()),
                format!("grace period must not exceed {} seconds", MAX_DURATION_SECS),
            ));
        }

        let workflow_path = match config.workflow_path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => {
                repo_path::normalize(path).map_err(|problem| {
                    Error::config_invalid_value("workflow_path", Some(path.to_string()), problem)
                })?;
                Some(path.to_string())
            }
            _ => None,
        };

        let targets = target::load_targets(&config)?;

        Ok(Self {
            publish: config.publish,
            concurrency: config.concurrency,
            default_timeout_secs: config.default_timeout_secs,
            grace_period_secs: config.grace_period_secs,
            workflow_path,
            targets,
        })
    }

    pub fn timeout_for(&self, target: &Target) -> Duration {
        Duration::from_secs(target.timeout_secs.unwrap_or(self.default_timeout_secs))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn validate_publish(publish: &PublishCommand) -> Result<()> {
    if publish.program.trim().is_empty() {
        return Err(Error::config_missing_key("publish.program", None));
    }

    let env_name = publish.credential_env.trim();
    let valid_env = !env_name.is_empty()
        && !env_name.starts_with(|c: char| c.is_ascii_digit())
        && env_name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_env {
        return Err(Error::config_invalid_value(
            "publish.credential_env",
            Some(publish.credential_env.clone()),
            "must be a valid environment variable name",
        ));
    }

    for arg in &publish.args {
        let unknown = template::unknown_placeholders(arg, TemplateVars::ALL);
        if let Some(first) = unknown.first() {
            return Err(Error::config_invalid_value(
                "publish.args",
                Some(arg.clone()),
                format!("unknown placeholder '{{{{{}}}}}'", first),
            )
            .with_hint(format!("Known placeholders: {}", TemplateVars::ALL.join(", "))));
        }
    }

    Ok(())
}
