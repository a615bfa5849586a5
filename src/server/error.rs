//! Server API error type.

use crate::protocol::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors returned by the sync API handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Diff-apply declared a base hash the server no longer stores.
    #[error("stale base: {0}")]
    StaleBase(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::StaleBase(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::PermissionDenied(_) => "permission_denied",
            ApiError::NotFound(_) => "not_found",
            ApiError::StaleBase(_) => "stale_base",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.label().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(e.to_string())
        } else {
            ApiError::Storage(e.to_string())
        }
    }
}

impl From<crate::metadata::StoreError> for ApiError {
    fn from(e: crate::metadata::StoreError) -> Self {
        ApiError::Storage(e.to_string())
    }
}

impl From<crate::path::PathError> for ApiError {
    fn from(e: crate::path::PathError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<base64::DecodeError> for ApiError {
    fn from(e: base64::DecodeError) -> Self {
        ApiError::BadRequest(format!("invalid base64: {e}"))
    }
}
