use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-origin failures, classified once at the adapter boundary
///
/// The dispatcher only ever branches on [`ErrorKind`]; nothing downstream
/// re-interprets provider responses. Adapter implementations must never put
/// credential material into these messages.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Bad or expired credentials. Terminal: retrying cannot help until the
    /// operator reconfigures the key.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider throttled the request (HTTP 429 or equivalent)
    #[error("rate limited by provider")]
    RateLimited {
        /// Provider-supplied backoff hint, when present
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout, or provider 5xx. Retryable.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Malformed prompt or parameters. Terminal.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Anything the adapter could not classify. Terminal, logged for
    /// investigation.
    #[error("unexpected provider failure: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// The Copy projection used in retry decisions and job records
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Transient(_) => ErrorKind::Transient,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the retry policy may attempt this request again
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Classified provider error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad or expired credentials
    Auth,
    /// Provider-side throttling
    RateLimited,
    /// Network failure, timeout, or 5xx
    Transient,
    /// Malformed prompt or parameters
    InvalidRequest,
    /// Unclassified failure
    Unknown,
    /// User-triggered cancellation; orchestrator-origin, never produced by
    /// an adapter
    Cancelled,
}

impl ErrorKind {
    /// Whether the kind is eligible for retry at all
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }
}

/// Terminal failure record delivered to every subscriber of a job
///
/// Cloneable so single-flight waiters all receive the same outcome, and
/// serializable so job snapshots can carry it to API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Classified error kind
    pub kind: ErrorKind,
    /// Provider the failure originated from
    pub provider: String,
    /// Client-safe message
    pub message: String,
    /// Adapter invocations spent before giving up
    pub attempts: u32,
}

impl FailureInfo {
    /// Build a failure record from a classified provider error
    pub fn from_error(error: &ProviderError, provider: &str, attempts: u32) -> Self {
        Self {
            kind: error.kind(),
            provider: provider.to_owned(),
            message: error.to_string(),
            attempts,
        }
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (provider {}, {} attempt{})",
            self.message,
            self.provider,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" }
        )
    }
}

/// Trait for domain errors that can be converted to HTTP responses
///
/// Implemented by each feature crate's error type. The server layer converts
/// these into actual HTTP responses, keeping domain errors decoupled from
/// axum.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `invalid_request_error`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;
}

impl HttpError for ProviderError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Transient(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::Auth(_) => "authentication_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::Transient(_) => "upstream_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Unknown(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Unknown(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }
}
