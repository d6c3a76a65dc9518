use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigParseFailed,
    ConfigInvalidValue,
    ConfigDuplicateTarget,

    DetectionInvalidPath,
    DetectionSourceFailed,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    SecretNotFound,
    SecretBackendFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigParseFailed => "config.parse_failed",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ConfigDuplicateTarget => "config.duplicate_target",

            ErrorCode::DetectionInvalidPath => "detection.invalid_path",
            ErrorCode::DetectionSourceFailed => "detection.source_failed",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SecretNotFound => "secret.not_found",
            ErrorCode::SecretBackendFailed => "secret.backend_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// True for the error family that must abort before anything is dispatched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConfigMissingKey
                | ErrorCode::ConfigParseFailed
                | ErrorCode::ConfigInvalidValue
                | ErrorCode::ConfigDuplicateTarget
        )
    }

    pub fn is_detection(&self) -> bool {
        matches!(
            self,
            ErrorCode::DetectionInvalidPath | ErrorCode::DetectionSourceFailed
        )
    }
}

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigParseFailed,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ConfigDuplicateTarget,
        ErrorCode::DetectionInvalidPath,
        ErrorCode::DetectionSourceFailed,
        ErrorCode::ValidationMissingArgument,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::SecretNotFound,
        ErrorCode::SecretBackendFailed,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseFailedDetails {
    pub path: String,
    pub format: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateTargetDetails {
    pub name: String,
    pub first_index: usize,
    pub duplicate_index: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidPathDetails {
    pub path: String,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretDetails {
    pub credential_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn config_missing_key(key: impl Into<String>, target: Option<String>) -> Self {
        let key = key.into();
        let message = match &target {
            Some(name) => format!("Target '{}' is missing required field '{}'", name, key),
            None => format!("Missing required configuration key '{}'", key),
        };
        Self::new(
            ErrorCode::ConfigMissingKey,
            message,
            to_details(ConfigMissingKeyDetails { key, target }),
        )
    }

    pub fn config_parse_failed(
        path: impl Into<String>,
        format: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let details = ConfigParseFailedDetails {
            path: path.into(),
            format: format.into(),
            error: error.into(),
        };
        Self::new(
            ErrorCode::ConfigParseFailed,
            format!("Could not parse {} registry {}", details.format, details.path),
            to_details(details),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        };
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", details.key, details.problem),
            to_details(details),
        )
    }

    pub fn config_duplicate_target(
        name: impl Into<String>,
        first_index: usize,
        duplicate_index: usize,
    ) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::ConfigDuplicateTarget,
            format!("Target name '{}' is declared more than once", name),
            to_details(DuplicateTargetDetails {
                name: name.clone(),
                first_index,
                duplicate_index,
            }),
        )
        .with_hint(format!("Rename one of the '{}' entries; names must be unique", name))
    }

    pub fn detection_invalid_path(path: impl Into<String>, problem: impl Into<String>) -> Self {
        let details = InvalidPathDetails {
            path: path.into(),
            problem: problem.into(),
        };
        Self::new(
            ErrorCode::DetectionInvalidPath,
            format!("Invalid changed path '{}': {}", details.path, details.problem),
            to_details(details),
        )
    }

    pub fn detection_source_failed(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::DetectionSourceFailed,
            "Could not read the change set",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                id,
                tried,
            }),
        )
    }

    pub fn secret_not_found(credential_ref: impl Into<String>) -> Self {
        let credential_ref = credential_ref.into();
        Self::new(
            ErrorCode::SecretNotFound,
            format!("Credential '{}' could not be resolved", credential_ref),
            to_details(SecretDetails {
                credential_ref,
                error: None,
            }),
        )
    }

    pub fn secret_backend_failed(credential_ref: impl Into<String>, error: impl Into<String>) -> Self {
        let credential_ref = credential_ref.into();
        let error = error.into();
        Self::new(
            ErrorCode::SecretBackendFailed,
            format!("Secret store error for '{}': {}", credential_ref, error),
            to_details(SecretDetails {
                credential_ref,
                error: Some(error),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn error_codes_are_unique_and_dotted() {
        let mut seen = HashSet::new();
        for code in all_codes() {
            let s = code.as_str();
            assert!(s.contains('.'), "{} is not dotted", s);
            assert!(seen.insert(s), "{} is duplicated", s);
        }
    }

    #[test]
    fn duplicate_target_carries_indices_and_hint() {
        let err = Error::config_duplicate_target("alpha", 0, 2);
        assert_eq!(err.code, ErrorCode::ConfigDuplicateTarget);
        assert_eq!(err.details["name"], "alpha");
        assert_eq!(err.details["duplicateIndex"], 2);
        assert_eq!(err.hints.len(), 1);
        assert!(err.code.is_config());
    }

    #[test]
    fn missing_key_names_the_target() {
        let err = Error::config_missing_key("workspace_id", Some("beta".to_string()));
        assert!(err.message.contains("beta"));
        assert!(err.message.contains("workspace_id"));
    }

    #[test]
    fn detection_family() {
        let err = Error::detection_invalid_path("/etc/passwd", "absolute path");
        assert!(err.code.is_detection());
        assert!(!err.code.is_config());
    }
}
