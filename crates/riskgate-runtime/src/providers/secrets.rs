//! Credential handling for LLM providers.
//!
//! Credentials live in a [`SecretString`] from the moment they are read.
//! They cannot appear in `Debug` or `Display` output, and are exposed only
//! where a request header is built.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from a configuration file
    Config,
    /// Loaded from an environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely stored API credential.
///
/// `Debug` and `Display` print `[REDACTED]`; use [`expose`](Self::expose)
/// at the point of use.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load a credential from an environment variable.
    ///
    /// An unset or blank variable is `NotConfigured`.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(ProviderError::NotConfigured(format!(
                "{} not set: configure '{}' environment variable",
                name, env_var
            ))),
        }
    }

    /// Use a configured value when present, else the environment variable.
    pub fn from_config_or_env(
        configured: Option<&str>,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        match configured {
            Some(value) if !value.trim().is_empty() => {
                Ok(Self::new(value, CredentialSource::Config, name))
            }
            _ => Self::from_env(env_var, name),
        }
    }

    /// Expose the credential value. Call only where a request is built.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {}): [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-super-secret-value-98765";

    #[test]
    fn test_credential_redacted_in_debug() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "Test key");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains(SECRET));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Environment, "Test key");
        let display = cred.to_string();
        assert!(!display.contains(SECRET));
        assert!(display.contains("environment"));
    }

    #[test]
    fn test_credential_expose() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "Test key");
        assert_eq!(cred.expose(), SECRET);
        assert!(!cred.is_empty());
        assert_eq!(cred.name(), "Test key");
    }

    #[test]
    fn test_config_value_preferred() {
        std::env::set_var("RISKGATE_TEST_KEY_PREFERRED", "from-env");
        let cred = ApiCredential::from_config_or_env(
            Some("from-config"),
            "RISKGATE_TEST_KEY_PREFERRED",
            "Test key",
        )
        .unwrap();
        assert_eq!(cred.expose(), "from-config");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_env_fallback() {
        std::env::set_var("RISKGATE_TEST_KEY_FALLBACK", "from-env");
        let cred =
            ApiCredential::from_config_or_env(None, "RISKGATE_TEST_KEY_FALLBACK", "Test key")
                .unwrap();
        assert_eq!(cred.expose(), "from-env");
        assert_eq!(cred.source(), CredentialSource::Environment);
    }

    #[test]
    fn test_missing_credential_is_not_configured() {
        let result =
            ApiCredential::from_config_or_env(Some("  "), "RISKGATE_TEST_KEY_UNSET", "Test key");
        match result {
            Err(ProviderError::NotConfigured(message)) => {
                assert!(message.contains("RISKGATE_TEST_KEY_UNSET"))
            }
            other => panic!("expected NotConfigured, got {:?}", other.map(|c| c.to_string())),
        }
    }
}
