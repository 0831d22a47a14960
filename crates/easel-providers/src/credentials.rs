use std::collections::HashMap;

use secrecy::SecretString;
use thiserror::Error;

/// Credential lookup errors
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No key is configured for the provider
    #[error("no credentials configured for provider '{0}'")]
    NotConfigured(String),
}

/// Source of provider API keys
///
/// Injected into adapters at construction; the engine never reads ambient
/// process state for secrets.
pub trait CredentialProvider: Send + Sync {
    /// Fetch the key for a provider
    fn get(&self, provider: &str) -> Result<SecretString, CredentialError>;
}

/// Credentials sourced from the loaded configuration
#[derive(Default)]
pub struct ConfigCredentials {
    keys: HashMap<String, SecretString>,
}

impl ConfigCredentials {
    /// Collect the keys of all configured providers
    pub fn from_config(config: &easel_config::Config) -> Self {
        let keys = config
            .providers
            .iter()
            .filter_map(|(name, provider)| provider.api_key.clone().map(|key| (name.clone(), key)))
            .collect();
        Self { keys }
    }

    /// Build from explicit pairs, mainly for tests
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, SecretString)>) -> Self {
        Self {
            keys: pairs.into_iter().collect(),
        }
    }
}

impl CredentialProvider for ConfigCredentials {
    fn get(&self, provider: &str) -> Result<SecretString, CredentialError> {
        self.keys
            .get(provider)
            .cloned()
            .ok_or_else(|| CredentialError::NotConfigured(provider.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_not_configured() {
        let credentials = ConfigCredentials::default();
        assert!(matches!(
            credentials.get("gemini"),
            Err(CredentialError::NotConfigured(_))
        ));
    }

    #[test]
    fn configured_key_is_returned() {
        let credentials =
            ConfigCredentials::from_pairs([("gemini".to_owned(), SecretString::from("sk-1"))]);
        assert!(credentials.get("gemini").is_ok());
    }
}
