//! # Auth Errors

use thiserror::Error;

use crate::directory::DirectoryError;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Deliberately does not say whether the email or the password was wrong
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Authentication required")]
    AuthRequired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("OAuth error: {0}")]
    OAuthError(String),

    #[error("OAuth provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("An account with this email already exists: {0}")]
    AccountConflict(String),

    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AuthError::InvalidCredentials => 401,
            AuthError::AuthRequired => 401,
            AuthError::ValidationError(_) => 400,
            AuthError::OAuthError(_) => 400,
            AuthError::ProviderNotConfigured(_) => 404,
            AuthError::AccountConflict(_) => 409,
            AuthError::RateLimitExceeded { .. } => 429,
            AuthError::Directory(e) => e.status_code(),
            AuthError::Internal(_) => 500,
        }
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AuthRequired => "AUTH_REQUIRED",
            AuthError::ValidationError(_) => "VALIDATION_ERROR",
            AuthError::OAuthError(_) => "OAUTH_ERROR",
            AuthError::ProviderNotConfigured(_) => "PROVIDER_NOT_CONFIGURED",
            AuthError::AccountConflict(_) => "ACCOUNT_CONFLICT",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMITED",
            AuthError::Directory(e) => e.error_code(),
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::InvalidCredentials.status_code(), 401);
        assert_eq!(AuthError::RateLimitExceeded { retry_after_secs: 3 }.status_code(), 429);
        assert_eq!(AuthError::AccountConflict("a@b.c".into()).status_code(), 409);
    }

    #[test]
    fn test_directory_errors_pass_through() {
        let err: AuthError = DirectoryError::UserNotFound(Uuid::nil()).into();
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.error_code(), "USER_NOT_FOUND");
    }
}
