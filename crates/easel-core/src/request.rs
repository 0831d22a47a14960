use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

/// Maximum accepted prompt length in characters
pub const MAX_PROMPT_LEN: usize = 8192;

/// Smallest accepted image dimension in pixels
pub const MIN_DIMENSION: u32 = 64;

/// Largest accepted image dimension in pixels
pub const MAX_DIMENSION: u32 = 4096;

/// Normalized image generation request
///
/// Immutable once submitted. Extra parameters keep their insertion order
/// for wire serialization, but fingerprinting sorts them so two requests
/// that differ only in parameter order are the same unit of work.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationRequest {
    /// Provider name (e.g. "gemini", "openrouter", "requesty")
    pub provider: String,
    /// Model identifier in the provider's namespace
    pub model: String,
    /// Text description of the desired image
    pub prompt: String,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Deterministic seed, when the provider supports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Template image the generation is conditioned on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateRef>,
    /// Provider-specific extra parameters
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub params: IndexMap<String, Value>,
}

/// Reference to a template image plus its content hash
///
/// The content hash participates in the fingerprint so that editing a
/// template in place invalidates cached results that used it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TemplateRef {
    /// Caller-meaningful reference (path, URL, or opaque id)
    pub reference: String,
    /// SHA-256 of the template content, lowercase hex
    pub sha256: String,
}

impl GenerationRequest {
    /// Check request bounds before any work is admitted
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidRequest` when the prompt is empty or
    /// too long, or a dimension falls outside the accepted range
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.prompt.trim().is_empty() {
            return Err(ProviderError::InvalidRequest("prompt must not be empty".to_owned()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_LEN {
            return Err(ProviderError::InvalidRequest(format!(
                "prompt exceeds {MAX_PROMPT_LEN} characters"
            )));
        }
        for (label, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(ProviderError::InvalidRequest(format!(
                    "{label} {value} outside accepted range {MIN_DIMENSION}..={MAX_DIMENSION}"
                )));
            }
        }
        if self.provider.is_empty() {
            return Err(ProviderError::InvalidRequest("provider must not be empty".to_owned()));
        }
        if self.model.is_empty() {
            return Err(ProviderError::InvalidRequest("model must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Requested size in the `WIDTHxHEIGHT` form most provider APIs expect
    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
