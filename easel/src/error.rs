use axum::{
    Json,
    response::{IntoResponse, Response},
};
use easel_core::HttpError as _;
use easel_engine::EngineError;
use serde::Serialize;

/// Renders engine errors in the OpenAI-compatible error envelope
#[derive(Debug)]
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        Self(error)
    }
}

/// Error response format compatible with the `OpenAI` API
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.0.client_message(),
                r#type: self.0.error_type().to_owned(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
