//! API error types.

use crate::backend::BackendError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pigment_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown route, bad hash, failed signature or missing blob. The message
    /// never names the blob so that probing reveals nothing.
    #[error("not found")]
    NotFound,

    #[error("expired")]
    Gone,

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("invalid transformation: {0}")]
    InvalidTransformation(String),

    #[error("unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Core(#[from] pigment_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "not_found",
            StatusCode::GONE => "gone",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "unsupported_media_type",
            StatusCode::UNPROCESSABLE_ENTITY => "invalid_transformation",
            StatusCode::NOT_IMPLEMENTED => "unsupported_source",
            StatusCode::METHOD_NOT_ALLOWED => "method_not_allowed",
            StatusCode::GATEWAY_TIMEOUT => "gateway_timeout",
            _ => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Gone => StatusCode::GONE,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidTransformation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UnsupportedSource(_) => StatusCode::NOT_IMPLEMENTED,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Backend(e) => match e {
                BackendError::InvalidTransformation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                BackendError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    StatusCode::NOT_FOUND
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(e) if e.is_invalid_transformation() => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to send to clients.
    fn public_message(&self) -> String {
        match self.status_code() {
            StatusCode::NOT_FOUND => "not found".to_string(),
            StatusCode::GATEWAY_TIMEOUT => "timed out fetching source".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Gone.status_code(), StatusCode::GONE);
        assert_eq!(
            ApiError::from(StorageError::Timeout("x".into())).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError::from(StorageError::NotFound("abc".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(BackendError::InvalidTransformation("W9".into())).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(pigment_core::Error::InvalidGeometry("zz".into())).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(pigment_core::Error::Config("bad".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_hides_blob() {
        let err = ApiError::from(StorageError::NotFound("d41d8cd98f".into()));
        assert_eq!(err.code(), "not_found");
        assert!(!err.public_message().contains("d41d8cd98f"));
    }
}
