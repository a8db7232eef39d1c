//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use gs_pipeline::{ReceiverError, RetryError};
use gs_store::StoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Sync configuration not found: {0}")]
    ConfigNotFound(String),

    #[error("Sync configuration is disabled: {0}")]
    ConfigDisabled(String),

    #[error("Webhook signature verification failed")]
    InvalidSignature,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sync event not found: {0}")]
    EventNotFound(String),

    #[error("Event is in {0} and cannot be retried")]
    NotRetryable(gs_common::SyncEventStatus),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ReceiverError> for ApiError {
    fn from(err: ReceiverError) -> Self {
        match err {
            ReceiverError::ConfigNotFound(id) => ApiError::ConfigNotFound(id),
            ReceiverError::ConfigDisabled(id) => ApiError::ConfigDisabled(id),
            ReceiverError::InvalidSignature => ApiError::InvalidSignature,
            ReceiverError::InvalidPayload(msg) => ApiError::Validation(msg),
            ReceiverError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RetryError> for ApiError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::NotFound(id) => ApiError::EventNotFound(id),
            RetryError::NotInFailedState(status) => ApiError::NotRetryable(status),
            RetryError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error response body
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ApiError::ConfigNotFound(_) => (StatusCode::NOT_FOUND, "CONFIG_NOT_FOUND"),
            ApiError::ConfigDisabled(_) => (StatusCode::FORBIDDEN, "CONFIG_DISABLED"),
            ApiError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::EventNotFound(_) => (StatusCode::NOT_FOUND, "EVENT_NOT_FOUND"),
            ApiError::NotRetryable(_) => (StatusCode::BAD_REQUEST, "NOT_RETRYABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
