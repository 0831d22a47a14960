use easel_core::HttpError;
use http::StatusCode;
use thiserror::Error;

use crate::job::{BatchId, JobId};

/// Orchestrator-origin errors surfaced to callers
///
/// Provider failures never appear here; they land in job records as
/// [`easel_core::FailureInfo`]. These are submission and query errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Request failed validation before any work was admitted
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Named provider is not configured or not active
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// No job exists with the id
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// No batch exists with the id
    #[error("batch not found: {0}")]
    BatchNotFound(BatchId),

    /// The engine is draining and accepts no new work
    #[error("engine is shutting down")]
    ShuttingDown,
}

impl HttpError for EngineError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::ProviderNotFound(_) | Self::JobNotFound(_) | Self::BatchNotFound(_) => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::ProviderNotFound(_) | Self::JobNotFound(_) | Self::BatchNotFound(_) => "not_found_error",
            Self::ShuttingDown => "unavailable_error",
        }
    }

    fn client_message(&self) -> String {
        self.to_string()
    }
}
