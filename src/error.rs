//! Error types for the webhook engine.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Webhook engine error variants.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Endpoint not found")]
    EndpointNotFound,

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("Endpoint already registered: {0}")]
    DuplicateEndpoint(uuid::Uuid),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response returned by the management API.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            EngineError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            EngineError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            EngineError::SsrfDetected(_) => (StatusCode::BAD_REQUEST, "ssrf_detected"),
            EngineError::EndpointNotFound => (StatusCode::NOT_FOUND, "endpoint_not_found"),
            EngineError::DeliveryNotFound => (StatusCode::NOT_FOUND, "delivery_not_found"),
            EngineError::DuplicateEndpoint(_) => (StatusCode::CONFLICT, "duplicate_endpoint"),
            EngineError::EncryptionFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "encryption_error")
            }
            EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            EngineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, EngineError>;
