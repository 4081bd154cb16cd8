//! # API Errors
//!
//! Every failure leaves the server as `{ error, code, status }`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::directory::DirectoryError;
use crate::permissions::PermissionError;

/// API error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub status: u16,
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    /// Abilities could not be built and the server fails closed
    #[error("Authorization is temporarily unavailable")]
    Unavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Auth(e) => e.status_code(),
            ApiError::Directory(e) => e.status_code(),
            ApiError::Permission(e) => e.status_code(),
            ApiError::BadRequest(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::Unavailable => 503,
            ApiError::Internal(_) => 500,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Auth(e) => e.error_code(),
            ApiError::Directory(e) => e.error_code(),
            ApiError::Permission(e) => e.error_code(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Unavailable => "AUTHZ_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failure to bring the server up
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address '{0}'")]
    Address(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            error: err.to_string(),
            code: err.error_code(),
            status: err.status_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "request failed");
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Action, SubjectType};
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::from(AuthError::AuthRequired).status_code(), 401);
        assert_eq!(ApiError::from(DirectoryError::GroupNotFound(Uuid::nil())).status_code(), 404);
        assert_eq!(ApiError::Unavailable.status_code(), 503);
        assert_eq!(ApiError::BadRequest("x".into()).error_code(), "BAD_REQUEST");
    }

    #[test]
    fn test_permission_reason_reaches_body() {
        let err = ApiError::from(PermissionError {
            action: Action::Update,
            subject: SubjectType::User,
            field: Some("system_role".to_string()),
            reason: Some("only administrators can change system roles".to_string()),
        });
        let body = ErrorResponse::from(&err);
        assert_eq!(body.status, 403);
        assert_eq!(body.code, "FORBIDDEN");
        assert!(body.error.contains("only administrators"));
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::Forbidden("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
