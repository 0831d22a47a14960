//! Shared types for the Easel generation engine
//!
//! Everything the feature crates agree on lives here: the normalized
//! generation request, the deterministic fingerprint, the provider error
//! taxonomy, and the artifact model.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod artifact;
mod error;
mod fingerprint;
mod request;

pub use artifact::{ArtifactDescriptor, ArtifactReference, ArtifactStore, ArtifactStoreError, GeneratedImage, Usage};
pub use error::{ErrorKind, FailureInfo, HttpError, ProviderError};
pub use fingerprint::Fingerprint;
pub use request::{GenerationRequest, TemplateRef, MAX_DIMENSION, MAX_PROMPT_LEN, MIN_DIMENSION};
