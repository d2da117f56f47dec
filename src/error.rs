use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::ErrorResponse;
use crate::ratelimit::REMAINING_HEADER;
use crate::repository::RepositoryError;

/// Convenience alias for handler and guard return types.
pub type AppResult<T> = Result<T, AppError>;

/// AppError
///
/// The error taxonomy of the guard layer plus the two ambient failures every
/// handler can hit (authentication, infrastructure). Variants are raised where
/// the condition is detected and travel unchanged to the HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Quota exhausted for the client's bucket.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::AccessDenied(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) | AppError::UnsupportedOperation(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Throttled { .. } => "too_many_requests",
            AppError::AccessDenied(_) => "access_denied",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::UnsupportedOperation(_) => "unsupported_operation",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Throttled { .. } => "Rate limit exceeded".to_string(),
            AppError::AccessDenied(m)
            | AppError::InvalidInput(m)
            | AppError::UnsupportedOperation(m)
            | AppError::NotFound(m) => m.clone(),
            AppError::Unauthorized => "Authentication required".to_string(),
            // Database details stay in the logs.
            AppError::Internal(_) => "Internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let AppError::Internal(detail) = &self {
            tracing::error!("internal error: {}", detail);
        }

        let retry_after = match &self {
            AppError::Throttled { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = Json(ErrorResponse {
            status: status.as_u16(),
            error: self.code().to_string(),
            message: self.public_message(),
            retry_after,
        });

        let mut response = (status, body).into_response();

        if let Some(secs) = retry_after {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            headers.insert(REMAINING_HEADER, HeaderValue::from_static("0"));
        }

        response
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Database(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Unreadable or ill-typed request bodies (missing `action`, wrong field types,
/// bad content type) are client input errors.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}
