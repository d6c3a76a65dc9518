//! String template rendering utilities.

use std::sync::OnceLock;

use regex::Regex;

pub struct TemplateVars;

impl TemplateVars {
    pub const TARGET_NAME: &'static str = "targetName";
    pub const SOURCE_PATH: &'static str = "sourcePath";
    pub const WORKSPACE_ID: &'static str = "workspaceId";
    pub const VERSION_LABEL: &'static str = "versionLabel";
    pub const PROVENANCE_URL: &'static str = "provenanceUrl";

    pub const ALL: &'static [&'static str] = &[
        Self::TARGET_NAME,
        Self::SOURCE_PATH,
        Self::WORKSPACE_ID,
        Self::VERSION_LABEL,
        Self::PROVENANCE_URL,
    ];
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

fn placeholder_pattern() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([^}]*?)\s*\}\}").expect("placeholder pattern is valid")
    })
}

/// Placeholders in `template` that are not in `known`, in order of appearance.
pub fn unknown_placeholders(template: &str, known: &[&str]) -> Vec<String> {
    placeholder_pattern()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| !known.contains(&name.as_str()))
        .collect()
}
