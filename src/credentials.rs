use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind, get_current_timestamp,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::{config::AppConfig, error::AppError};

/// Claims
///
/// Payload carried inside every session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Id of the user the token was issued to.
    pub user_id: i32,
    /// Issued At (iat), seconds since the epoch.
    pub iat: u64,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: u64,
}

/// Credentials
///
/// Issues and validates signed, time-bounded session tokens. Built once at startup
/// from the immutable configuration and shared read-only between requests.
#[derive(Clone)]
pub struct Credentials {
    encoding: EncodingKey,
    decoding: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
    hash_cost: u32,
}

/// Shared handle used in the application state.
pub type CredentialState = Arc<Credentials>;

impl Credentials {
    pub fn new(secret: &str, algorithm: Algorithm, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            ttl,
            hash_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Overrides the bcrypt work factor.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost;
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.secret_key, config.algorithm, config.token_ttl)
            .with_hash_cost(config.bcrypt_cost)
    }

    /// issue_token
    ///
    /// Signs `{user_id, iat, exp}` with the server secret, where `exp = now + ttl`.
    pub fn issue_token(&self, user_id: i32) -> Result<String, AppError> {
        let now = get_current_timestamp();
        let claims = Claims {
            user_id,
            iat: now,
            exp: now + self.ttl.as_secs(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding).map_err(|e| {
            tracing::error!("token signing failed: {:?}", e);
            AppError::Internal("Internal server error".to_string())
        })
    }

    /// validate_token
    ///
    /// Verifies algorithm, signature and expiry (no leeway) and returns the user id.
    /// Any failure, including a payload without `user_id`, is `Unauthorized`.
    pub fn validate_token(&self, token: &str) -> Result<i32, AppError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.leeway = 0;

        match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => Ok(data.claims.user_id),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("rejected expired token"),
                    other => tracing::debug!("rejected token: {:?}", other),
                }
                Err(AppError::Unauthorized)
            }
        }
    }

    /// hash_password
    ///
    /// Salted bcrypt hash. bcrypt is deliberately slow, so it runs on the blocking pool
    /// instead of stalling the async workers.
    pub async fn hash_password(&self, plain: String) -> Result<String, AppError> {
        let cost = self.hash_cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(plain, cost)).await??;
        Ok(hashed)
    }

    /// verify_password
    ///
    /// Constant-time comparison through bcrypt. A stored hash that bcrypt cannot parse
    /// never matches.
    pub async fn verify_password(&self, plain: String, hashed: String) -> Result<bool, AppError> {
        let matches =
            tokio::task::spawn_blocking(move || bcrypt::verify(plain, &hashed).unwrap_or(false))
                .await?;
        Ok(matches)
    }
}
