//! Repository-relative path normalization and matching.
//!
//! Changed paths, target source paths and workflow paths all go through
//! `normalize` so they compare as plain `/`-separated strings.

/// Normalize a repository-relative path.
///
/// Trims whitespace, converts `\` to `/`, strips leading `./` segments,
/// collapses repeated separators and drops a trailing `/`. Rejects empty,
/// absolute and parent-escaping paths with a short problem description.
pub fn normalize(raw: &str) -> Result<String, &'static str> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err("path is empty");
    }
    if trimmed.contains('\0') {
        return Err("path contains a NUL byte");
    }

    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err("path must be relative to the repository root");
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err("path must not contain '..' segments"),
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Err("path points at the repository root");
    }

    Ok(segments.join("/"))
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// True if `path` is `prefix` itself or lies below it.
///
/// Both arguments must already be normalized. Matching is on whole
/// segments: `alpha` covers `alpha/x.py` but not `alphabet/x.py`.
pub fn is_under(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// True if the pattern should be matched as a glob instead of a prefix.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_and_trailing_slash() {
        assert_eq!(normalize("./alpha/").unwrap(), "alpha");
        assert_eq!(normalize("alpha//pipeline.py").unwrap(), "alpha/pipeline.py");
        assert_eq!(normalize("  beta\\pipeline.py ").unwrap(), "beta/pipeline.py");
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert!(normalize("/etc/passwd").is_err());
        assert!(normalize("C:/repo/file").is_err());
        assert!(normalize("alpha/../beta").is_err());
        assert!(normalize("   ").is_err());
        assert!(normalize("./").is_err());
        assert!(normalize("a\0b").is_err());
    }

    #[test]
    fn is_under_matches_whole_segments() {
        assert!(is_under("alpha/pipeline.py", "alpha"));
        assert!(is_under("alpha", "alpha"));
        assert!(is_under("pipelines/alpha/x.py", "pipelines/alpha"));
        assert!(!is_under("alphabet/pipeline.py", "alpha"));
        assert!(!is_under("beta/alpha/x.py", "alpha"));
    }

    #[test]
    fn glob_detection() {
        assert!(is_glob("pipelines/*/pipeline.py"));
        assert!(is_glob("src/{a,b}"));
        assert!(!is_glob("validate-config"));
    }
}
