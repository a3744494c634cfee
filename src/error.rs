use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// AppError
///
/// The single failure taxonomy of the service. Every business-rule failure is raised
/// at the point of detection as one of these variants and translated to an HTTP status
/// by the `IntoResponse` implementation below.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// Missing, invalid or expired token, or the token's subject no longer exists.
    #[error("Could not validate credentials")]
    Unauthorized,

    /// Authenticated, but not the owner of the target resource.
    #[error("Not authorized to perform requested action")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    /// Uniqueness violation on create/update, or a contradictory vote request.
    #[error("{0}")]
    Conflict(String),

    /// Request payload violates a domain rule (e.g. rating outside [0,5]).
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

/// ErrorBody
///
/// JSON shape of every error response: `{"detail": "..."}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        AppError::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }

        response
    }
}

/// Unclassified persistence failures are logged with full detail and surfaced
/// to the client as a generic 500.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("database error: {:?}", err);
        AppError::Internal("Internal server error".to_string())
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        tracing::error!("password hashing error: {:?}", err);
        AppError::Internal("Internal server error".to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!("blocking task failed: {:?}", err);
        AppError::Internal("Internal server error".to_string())
    }
}

/// Malformed, mistyped or non-JSON request bodies. Reported as 422 with the same
/// `{"detail"}` body as every other failure.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("rejected request body: {}", rejection.body_text());
        AppError::Validation(rejection.body_text())
    }
}
