//! Provider adapters for image generation backends
//!
//! Each adapter translates the normalized [`easel_core::GenerationRequest`]
//! into its provider's wire format and classifies failures into the shared
//! error taxonomy exactly once, at this boundary. The dispatcher never
//! carries provider-specific logic; adding a backend means implementing
//! [`ImageProvider`] and one config enum variant.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod adapter;
mod chat;
mod credentials;
mod gemini;
mod openrouter;
mod requesty;

pub use adapter::{ImageProvider, build_providers};
pub use credentials::{ConfigCredentials, CredentialError, CredentialProvider};
pub use gemini::GeminiAdapter;
pub use openrouter::OpenRouterAdapter;
pub use requesty::RequestyAdapter;
