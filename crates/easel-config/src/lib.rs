//! Easel configuration
//!
//! TOML-backed, with `{{ env.VAR }}` expansion before deserialization so
//! secrets stay out of config files. All duration fields are human-readable
//! strings parsed with `duration-str` (e.g. "500ms", "30s").

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod dispatcher;
mod env;
mod loader;
pub mod providers;
pub mod server;

use serde::Deserialize;

pub use dispatcher::{DispatcherConfig, RetryConfig};
pub use providers::{ProviderConfig, ProviderType, RateConfig};
pub use server::{ArtifactsConfig, ServerConfig};

/// Top-level Easel configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact storage configuration
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Dispatcher and retry configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Provider configurations keyed by name
    #[serde(default)]
    pub providers: indexmap::IndexMap<String, ProviderConfig>,
}

impl Config {
    /// Names of providers that are active and selectable
    pub fn active_providers(&self) -> impl Iterator<Item = (&str, &ProviderConfig)> {
        self.providers
            .iter()
            .filter(|(_, p)| p.active)
            .map(|(name, p)| (name.as_str(), p))
    }
}
