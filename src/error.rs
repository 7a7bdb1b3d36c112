use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::repository::StoreError;

/// AppError
///
/// The error taxonomy shared by every layer that can reject a request.
/// Each variant maps to one HTTP status and one stable, machine-readable `kind`.
///
/// `Transient` and `Internal` carry server-side detail that is logged but never
/// rendered to the caller.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, malformed, forged or expired credential, or a credential that
    /// names no active identity. Deliberately carries no reason.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but neither the owner nor privileged enough.
    #[error("forbidden")]
    Forbidden,

    /// Admission denied; the client may retry after `retry_after`.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    /// Version mismatch on update or uniqueness violation on create.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    /// I/O timeout or transport failure against the cache or the database.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// ErrorBody
///
/// JSON envelope rendered for every failed request: `{"error": {"kind", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthenticated => "unauthenticated",
            AppError::Forbidden => "forbidden",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::Conflict(_) => "conflict",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Transient(_) => "transient",
            AppError::Internal(_) => "internal",
        }
    }

    /// The human message shown to the caller. Server-side failures stay opaque.
    fn public_message(&self) -> String {
        match self {
            AppError::Unauthenticated => "invalid credentials or unauthorized token".to_string(),
            AppError::Forbidden => "you do not have permission to perform this action".to_string(),
            AppError::RateLimited { .. } => "rate limit exceeded".to_string(),
            AppError::Conflict(msg) | AppError::BadRequest(msg) => msg.clone(),
            AppError::NotFound => "the requested resource was not found".to_string(),
            AppError::Transient(_) | AppError::Internal(_) => {
                "the server encountered a problem".to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Transient(detail) => {
                tracing::error!(kind = self.kind(), "transient failure: {}", detail)
            }
            AppError::Internal(detail) => {
                tracing::error!(kind = self.kind(), "internal error: {}", detail)
            }
            _ => {}
        }

        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind(),
                message: self.public_message(),
            },
        };
        let mut response = (status, Json(body)).into_response();

        if let AppError::RateLimited { retry_after } = self {
            // Retry-After is whole seconds; a sub-second window still asks for one.
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound,
            StoreError::Conflict(constraint) => {
                // Constraint names describe the schema; they stay in the logs.
                tracing::info!(constraint = %constraint, "unique constraint violated");
                AppError::Conflict("resource already exists".to_string())
            }
            StoreError::Timeout => AppError::Transient("database operation timed out".to_string()),
            StoreError::Database(e) => AppError::Transient(e.to_string()),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
