use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{db::StoreError, services::identity::IdentityError};

/// Credential failures. Every variant except the wrapped infrastructure
/// errors maps to the same "access denied" response.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token is malformed or its signature is invalid")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token has been revoked")]
    Revoked,
    #[error("token kind does not match the expected kind")]
    WrongKind,
    #[error("refresh token was superseded or its record is missing")]
    SupersededOrMissing,
    #[error("token subject no longer exists")]
    PrincipalNotFound,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Store(e) => {
                error!(error = %e, "Shared store failure during authentication");
                AppError::Internal("store unavailable".to_string())
            }
            AuthError::Identity(IdentityError::EmailTaken) => {
                AppError::Conflict("email already registered".to_string())
            }
            AuthError::Identity(e) => {
                error!(error = %e, "Identity store failure");
                AppError::Internal("identity store failure".to_string())
            }
            AuthError::Signing(e) => {
                error!(error = %e, "Failed to sign token");
                AppError::Internal("token signing failed".to_string())
            }
            denied => {
                warn!(reason = %denied, "Access denied");
                AppError::Unauthorized
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            AppError::Validation(s) => (StatusCode::BAD_REQUEST, s.as_str()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "access denied"),
            AppError::Conflict(s) => (StatusCode::CONFLICT, s.as_str()),
            AppError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        (status, Json(json!({ "error": msg }))).into_response()
    }
}
