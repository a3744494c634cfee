use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use crate::{credentials::CredentialState, error::AppError, repository::RepositoryState};

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. Handlers use it as the
/// acting user for ownership checks and as the owner of newly created rows.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub username: String,
}

/// AuthUser Extractor Implementation
///
/// 1. Token Extraction: `Authorization: Bearer <token>`.
/// 2. Token Validation: signature, algorithm and expiry via `Credentials`.
/// 3. DB Lookup: the token's subject must still exist, so a token outlives
///    neither its TTL nor its account.
///
/// An identity already resolved by the authentication layer for this request is reused
/// from the request extensions. Nothing is cached between requests.
/// Rejection: `AppError::Unauthorized` (401).
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    CredentialState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(resolved) = parts.extensions.get::<AuthUser>() {
            return Ok(resolved.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let credentials = CredentialState::from_ref(state);

        // 1. Token Extraction
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        // 2. Token Validation
        let user_id = credentials.validate_token(token)?;

        // 3. Database Lookup
        let user = repo.find_user(user_id).await?.ok_or_else(|| {
            tracing::debug!(user_id, "token subject no longer exists");
            AppError::Unauthorized
        })?;

        Ok(AuthUser {
            id: user.id,
            email: user.email,
            username: user.username,
        })
    }
}
