//! Version label and provenance link for a deployment.
//!
//! Resolution order: explicit values, then the CI environment
//! (`GITHUB_SHA`, `GITHUB_SERVER_URL`, `GITHUB_REPOSITORY`), then the local
//! git checkout for the version label.

use serde::Serialize;

use crate::error::Result;
use crate::utils::command;
use crate::utils::validation;

const DEFAULT_SERVER_URL: &str = "https://github.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub version_label: String,
    pub provenance_url: String,
}

/// Values given explicitly on the command line.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceOverrides {
    pub version_label: Option<String>,
    pub provenance_url: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve provenance with an injectable environment lookup.
pub fn resolve_with<F>(
    overrides: &ProvenanceOverrides,
    repo_dir: &str,
    lookup: F,
) -> Result<Provenance>
where
    F: Fn(&str) -> Option<String>,
{
    let ci_sha = non_empty(lookup("GITHUB_SHA"));

    let version_label = non_empty(overrides.version_label.clone())
        .or_else(|| ci_sha.clone())
        .or_else(|| command::run_in_optional(repo_dir, "git", &["rev-parse", "HEAD"]));
    let version_label = validation::require_with_hints(
        version_label,
        "version_label",
        "No version label: pass --version-label or run inside a git checkout",
        &["In CI, GITHUB_SHA is used automatically"],
    )?;

    let provenance_url = non_empty(overrides.provenance_url.clone()).or_else(|| {
        let repository = non_empty(lookup("GITHUB_REPOSITORY"))?;
        let server =
            non_empty(lookup("GITHUB_SERVER_URL")).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
        let sha = ci_sha.clone().unwrap_or_else(|| version_label.clone());
        Some(format!(
            "{}/{}/commit/{}",
            server.trim_end_matches('/'),
            repository,
            sha
        ))
    });
    let provenance_url = validation::require_with_hints(
        provenance_url,
        "provenance_url",
        "No provenance link: pass --provenance-url or set GITHUB_REPOSITORY",
        &[],
    )?;

    Ok(Provenance {
        version_label,
        provenance_url,
    })
}

/// Resolve provenance from the process environment.
pub fn resolve(overrides: &ProvenanceOverrides, repo_dir: &str) -> Result<Provenance> {
    resolve_with(overrides, repo_dir, |key| std::env::var(key).ok())
}
