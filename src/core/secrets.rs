//! Credential resolution for dispatches.
//!
//! Targets carry a `credential_ref`, never a secret. The reference is
//! resolved right before the publish command is spawned:
//!
//! - `env:NAME` or bare `NAME` - process environment variable
//! - `keyring:ACCOUNT` - system keychain entry under the `deploy-dispatcher` service
//!
//! Resolved values must never be logged; [`redact`] scrubs them from
//! captured output.

use std::collections::HashMap;

use keyring::Entry;

use crate::error::{Error, Result};

const SERVICE_NAME: &str = "deploy-dispatcher";
const REDACTED: &str = "***";

/// Whether `keyring` was built with a persistent store for this target.
/// Elsewhere it falls back to an in-memory mock that never holds anything.
const NATIVE_KEYSTORE: bool = cfg!(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "windows"
));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRef<'a> {
    Env(&'a str),
    Keyring(&'a str),
}

impl<'a> CredentialRef<'a> {
    pub fn parse(raw: &'a str) -> Self {
        let raw = raw.trim();
        if let Some(account) = raw.strip_prefix("keyring:") {
            CredentialRef::Keyring(account.trim())
        } else if let Some(name) = raw.strip_prefix("env:") {
            CredentialRef::Env(name.trim())
        } else {
            CredentialRef::Env(raw)
        }
    }
}

pub trait SecretStore: Send + Sync {
    fn resolve(&self, credential_ref: &str) -> Result<String>;
}

/// Environment variables and the system keychain.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSecretStore;

fn keyring_error(credential_ref: &str, e: keyring::Error) -> Error {
    Error::secret_backend_failed(credential_ref, e.to_string())
}

impl SecretStore for SystemSecretStore {
    fn resolve(&self, credential_ref: &str) -> Result<String> {
        match CredentialRef::parse(credential_ref) {
            CredentialRef::Env(name) => std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::secret_not_found(credential_ref)
                        .with_hint(format!("Export {} in the CI job environment", name))
                }),
            CredentialRef::Keyring(account) => {
                if !NATIVE_KEYSTORE {
                    return Err(Error::secret_backend_failed(
                        credential_ref,
                        "no system keychain is available on this platform",
                    ));
                }
                let entry =
                    Entry::new(SERVICE_NAME, account).map_err(|e| keyring_error(credential_ref, e))?;
                match entry.get_password() {
                    Ok(value) if !value.is_empty() => Ok(value),
                    Ok(_) | Err(keyring::Error::NoEntry) => {
                        Err(Error::secret_not_found(credential_ref))
                    }
                    Err(e) => Err(keyring_error(credential_ref, e)),
                }
            }
        }
    }
}

/// Fixed reference-to-value map. Useful for embedding and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    values: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential_ref: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(credential_ref.into(), value.into());
        self
    }
}

impl SecretStore for StaticSecretStore {
    fn resolve(&self, credential_ref: &str) -> Result<String> {
        self.values
            .get(credential_ref)
            .cloned()
            .ok_or_else(|| Error::secret_not_found(credential_ref))
    }
}

/// Replace every occurrence of each secret in `text`.
pub fn redact(text: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .filter(|s| !s.is_empty())
        .fold(text.to_string(), |acc, secret| acc.replace(secret, REDACTED))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn parses_reference_schemes() {
        assert_eq!(CredentialRef::parse("env:HEXA_TOKEN"), CredentialRef::Env("HEXA_TOKEN"));
        assert_eq!(CredentialRef::parse("HEXA_TOKEN"), CredentialRef::Env("HEXA_TOKEN"));
        assert_eq!(
            CredentialRef::parse("keyring:senegal"),
            CredentialRef::Keyring("senegal")
        );
    }

    #[test]
    fn missing_env_secret_is_not_found() {
        let err = SystemSecretStore
            .resolve("env:DEPLOY_DISPATCHER_TEST_SURELY_UNSET_VAR")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecretNotFound);
        assert!(!err.hints.is_empty());
    }

    #[test]
    fn keyring_reference_reads_stored_entry() {
        let account = format!("test-{}", uuid::Uuid::new_v4());
        let entry = Entry::new(SERVICE_NAME, &account).unwrap();
        // Sandboxes without keyutils or a keychain cannot store anything.
        if entry.set_password("kr-s3cret").is_err() {
            return;
        }

        let resolved = SystemSecretStore.resolve(&format!("keyring:{}", account));
        let _ = entry.delete_credential();
        assert_eq!(resolved.unwrap(), "kr-s3cret");

        let err = SystemSecretStore
            .resolve(&format!("keyring:{}", account))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SecretNotFound);
    }

    #[test]
    fn static_store_resolves_known_refs() {
        let store = StaticSecretStore::new().with("env:A", "s3cret");
        assert_eq!(store.resolve("env:A").unwrap(), "s3cret");
        assert!(store.resolve("env:B").is_err());
    }

    #[test]
    fn redact_scrubs_all_occurrences() {
        let text = "token s3cret rejected (s3cret)";
        assert_eq!(redact(text, &["s3cret"]), "token *** rejected (***)");
        assert_eq!(redact(text, &[""]), text);
    }
}
