use async_trait::async_trait;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque handle to stored artifact bytes
///
/// Produced by an [`ArtifactStore`] on write; the engine treats it as an
/// opaque token and never inspects the inner value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactReference(pub String);

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Descriptor of a completed generation, as cached and returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// SHA-256 of the output bytes, lowercase hex
    pub sha256: String,
    /// Where the bytes live
    pub reference: ArtifactReference,
    /// Provider that served the generation
    pub provider: String,
    /// Model that produced the output
    pub model: String,
    /// When the artifact was produced
    pub created_at: Timestamp,
    /// Provider-assigned response id, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    /// Token/usage accounting, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens consumed by the prompt
    pub prompt_tokens: u64,
    /// Tokens consumed producing the output
    pub completion_tokens: u64,
}

/// Raw output of a successful adapter call, before storage
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Image bytes as returned by the provider
    pub bytes: Vec<u8>,
    /// MIME type when the provider declares one
    pub mime_type: Option<String>,
    /// Provider-assigned response id
    pub response_id: Option<String>,
    /// Usage accounting, when reported
    pub usage: Option<Usage>,
}

/// Artifact storage errors
#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    /// Underlying storage failed
    #[error("artifact storage: {0}")]
    Storage(String),
    /// No artifact exists for the given reference
    #[error("artifact not found: {0}")]
    NotFound(ArtifactReference),
}

/// Where generated bytes ultimately live
///
/// The engine only needs write-then-read; retention and layout belong to the
/// implementation.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist output bytes, returning a stable reference
    async fn write(&self, bytes: &[u8]) -> Result<ArtifactReference, ArtifactStoreError>;

    /// Fetch previously written bytes
    async fn read(&self, reference: &ArtifactReference) -> Result<Vec<u8>, ArtifactStoreError>;
}
