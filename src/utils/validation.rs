//! Input validation primitives.
//!
//! Replace verbose `ok_or_else` + `Error::validation_invalid_argument` chains.

use crate::error::{Error, Result};

/// Require an Option to contain a value, with hints for resolution.
pub fn require_with_hints<T>(
    opt: Option<T>,
    field: &str,
    message: &str,
    hints: &[&str],
) -> Result<T> {
    opt.ok_or_else(|| {
        hints.iter().fold(
            Error::validation_invalid_argument(field, message, None, None),
            |err, hint| err.with_hint(*hint),
        )
    })
}

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_with_hints_returns_value_when_some() {
        let result = require_with_hints(Some("value"), "field", "msg", &[]);
        assert_eq!(result.unwrap(), "value");
    }

    #[test]
    fn require_with_hints_attaches_hints() {
        let err = require_with_hints::<&str>(None, "field", "Missing field", &["a", "b"])
            .unwrap_err();
        assert_eq!(err.hints.len(), 2);
        assert_eq!(err.details["field"], "field");
    }

    #[test]
    fn require_non_empty_trims_whitespace() {
        let result = require_non_empty("  hello  ", "field", "msg");
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn require_non_empty_fails_for_whitespace_only() {
        let result = require_non_empty("   ", "field", "Cannot be empty");
        assert!(result.is_err());
    }
}
