//! Change detection: which targets does a push touch?
//!
//! A [`ChangeSet`] is the normalized list of paths from the triggering push.
//! [`affected`] and [`detect`] are pure functions over a target list and a
//! change set; they never fail and keep registry order.

use std::collections::HashSet;

use glob_match::glob_match;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::target::Target;
use crate::utils::command;
use crate::utils::repo_path;
use crate::utils::validation;

/// Normalized, de-duplicated set of changed paths in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    paths: Vec<String>,
}

impl ChangeSet {
    /// Build a change set from raw path entries. Blank entries are skipped.
    pub fn parse<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = ChangeSet::default();
        let mut seen = HashSet::new();

        for entry in entries {
            let raw = entry.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            let path = repo_path::normalize(raw)
                .map_err(|problem| Error::detection_invalid_path(raw, problem))?;
            if seen.insert(path.clone()) {
                set.paths.push(path);
            }
        }

        Ok(set)
    }

    /// Parse a newline-separated listing (e.g. `git diff --name-only` output).
    pub fn parse_listing(text: &str) -> Result<Self> {
        Self::parse(text.lines())
    }

    /// Paths changed between two revisions of the repository at `repo_dir`.
    ///
    /// An all-zero `base` (a freshly pushed branch) falls back to the files
    /// touched by `head` itself.
    pub fn from_git_range(repo_dir: &str, base: &str, head: &str) -> Result<Self> {
        let base = validation::require_non_empty(base, "since", "Base revision cannot be empty")?;
        let is_null_base = !base.is_empty() && base.chars().all(|c| c == '0');

        let output = if is_null_base {
            command::run_in(
                repo_dir,
                "git",
                &[
                    "-c",
                    "core.quotePath=false",
                    "diff-tree",
                    "--no-commit-id",
                    "--name-only",
                    "--no-renames",
                    "-r",
                    "--root",
                    head,
                ],
                "git diff-tree",
            )
        } else {
            command::run_in(
                repo_dir,
                "git",
                &[
                    "-c",
                    "core.quotePath=false",
                    "diff",
                    "--name-only",
                    "--no-renames",
                    base,
                    head,
                ],
                "git diff",
            )
        }
        .map_err(|e| {
            let error = e.details["error"].as_str().unwrap_or(&e.message).to_string();
            Error::detection_source_failed(error, Some(format!("{}..{}", base, head)))
        })?;

        Self::parse_listing(&output)
    }

    /// Union of two change sets, keeping `self`'s order first.
    pub fn merge(mut self, other: ChangeSet) -> Self {
        let mut seen: HashSet<String> = self.paths.iter().cloned().collect();
        for path in other.paths {
            if seen.insert(path.clone()) {
                self.paths.push(path);
            }
        }
        self
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// A changed path lies under the target's source path.
    SourcePath,
    /// A changed path is the target's (or the registry's) workflow file.
    SelfTrigger,
}

/// An affected target together with the first path that triggered it.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub target: Target,
    pub reason: TriggerReason,
    pub matched_path: String,
}

fn source_matches(pattern: &str, path: &str) -> bool {
    if repo_path::is_glob(pattern) {
        glob_match(pattern, path)
    } else {
        repo_path::is_under(path, pattern)
    }
}

fn normalized(path: Option<&str>) -> Option<String> {
    path.and_then(|p| repo_path::normalize(p).ok())
}

fn match_target(
    target: &Target,
    changes: &ChangeSet,
    registry_workflow: Option<&str>,
) -> Option<(TriggerReason, String)> {
    let pattern = target.match_pattern();
    if let Some(path) = changes.paths().iter().find(|p| source_matches(&pattern, p)) {
        return Some((TriggerReason::SourcePath, path.clone()));
    }

    let workflow_paths = [normalized(target.workflow_path.as_deref()), normalized(registry_workflow)];
    changes
        .paths()
        .iter()
        .find(|p| workflow_paths.iter().flatten().any(|w| w == *p))
        .map(|p| (TriggerReason::SelfTrigger, p.clone()))
}

/// Affected targets with the reason each one was selected, in registry order.
///
/// `registry_workflow` is the dispatcher's own workflow/registry file; a
/// change to it self-triggers every target.
pub fn detect(
    targets: &[Target],
    changes: &ChangeSet,
    registry_workflow: Option<&str>,
) -> Vec<Detection> {
    targets
        .iter()
        .filter_map(|target| {
            match_target(target, changes, registry_workflow).map(|(reason, matched_path)| {
                Detection {
                    target: target.clone(),
                    reason,
                    matched_path,
                }
            })
        })
        .collect()
}

/// Targets touched by `changes`, in registry order. Empty when nothing matched.
pub fn affected(targets: &[Target], changes: &ChangeSet) -> Vec<Target> {
    detect(targets, changes, None)
        .into_iter()
        .map(|d| d.target)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn target(name: &str, source: &str) -> Target {
        Target {
            name: name.to_string(),
            source_path: source.to_string(),
            workspace_id: format!("ws-{}", name),
            credential_ref: "env:TOKEN".to_string(),
            timeout_secs: None,
            workflow_path: None,
        }
    }

    fn names(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn only_touched_target_is_affected() {
        let targets = vec![target("alpha", "alpha/"), target("beta", "beta/")];
        let changes = ChangeSet::parse(["beta/pipeline.py"]).unwrap();
        assert_eq!(names(&affected(&targets, &changes)), vec!["beta"]);
    }

    #[test]
    fn registry_order_is_preserved() {
        let targets = vec![target("zeta", "z/"), target("alpha", "a/"), target("mid", "m/")];
        let changes = ChangeSet::parse(["m/x.py", "a/y.py", "z/z.py"]).unwrap();
        assert_eq!(names(&affected(&targets, &changes)), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn prefix_is_segment_based() {
        let targets = vec![target("alpha", "alpha/")];
        let changes = ChangeSet::parse(["alphabet/pipeline.py", "docs/alpha/readme.md"]).unwrap();
        assert!(affected(&targets, &changes).is_empty());
    }

    #[test]
    fn self_trigger_selects_owner() {
        let mut alpha = target("alpha", "alpha/");
        alpha.workflow_path = Some(".github/workflows/alpha.yml".to_string());
        let targets = vec![alpha, target("beta", "beta/")];
        let changes = ChangeSet::parse([".github/workflows/alpha.yml"]).unwrap();

        let detections = detect(&targets, &changes, None);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].target.name, "alpha");
        assert_eq!(detections[0].reason, TriggerReason::SelfTrigger);
    }

    #[test]
    fn registry_workflow_selects_everything() {
        let targets = vec![target("alpha", "alpha/"), target("beta", "beta/")];
        let changes = ChangeSet::parse(["deploy-dispatcher.toml"]).unwrap();
        let detections = detect(&targets, &changes, Some("./deploy-dispatcher.toml"));
        assert_eq!(detections.len(), 2);
        assert!(detections.iter().all(|d| d.reason == TriggerReason::SelfTrigger));
    }

    #[test]
    fn source_match_wins_over_self_trigger() {
        let mut alpha = target("alpha", "alpha/");
        alpha.workflow_path = Some("wf/alpha.yml".to_string());
        let changes = ChangeSet::parse(["wf/alpha.yml", "alpha/a.py"]).unwrap();
        let detections = detect(&[alpha], &changes, None);
        assert_eq!(detections[0].reason, TriggerReason::SourcePath);
        assert_eq!(detections[0].matched_path, "alpha/a.py");
    }

    #[test]
    fn glob_source_paths() {
        let targets = vec![target("pipelines", "pipelines/*/pipeline.py")];
        let hit = ChangeSet::parse(["pipelines/xlsform/pipeline.py"]).unwrap();
        let miss = ChangeSet::parse(["pipelines/xlsform/README.md"]).unwrap();
        assert_eq!(affected(&targets, &hit).len(), 1);
        assert!(affected(&targets, &miss).is_empty());
    }

    #[test]
    fn empty_change_set_affects_nothing() {
        let targets = vec![target("alpha", "alpha/")];
        assert!(affected(&targets, &ChangeSet::default()).is_empty());
    }

    #[test]
    fn parse_normalizes_and_dedupes() {
        let changes =
            ChangeSet::parse_listing("./alpha/a.py\n\nalpha/a.py\r\nbeta\\b.py\n").unwrap();
        assert_eq!(changes.paths(), &["alpha/a.py".to_string(), "beta/b.py".to_string()]);
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        let err = ChangeSet::parse(["alpha/a.py", "/abs/path"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectionInvalidPath);
        let err = ChangeSet::parse(["alpha/../../etc"]).unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectionInvalidPath);
    }

    #[test]
    fn merge_keeps_first_order() {
        let a = ChangeSet::parse(["x", "y"]).unwrap();
        let b = ChangeSet::parse(["y", "z"]).unwrap();
        let merged = a.merge(b);
        assert_eq!(merged.paths(), &["x".to_string(), "y".to_string(), "z".to_string()]);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn git_range_outside_repo_is_detection_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ChangeSet::from_git_range(dir.path().to_str().unwrap(), "HEAD~1", "HEAD")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DetectionSourceFailed);
    }
}
