//! Session tokens: HS256 JWTs whose subject is the user's handle.
//!
//! Handles can be renamed and later reused, so every token also carries the
//! account id. A token is only accepted while its handle still belongs to
//! that account.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pixelgit_store::ErrorKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Handle of the signed-in user.
    pub sub: String,
    /// Immutable account id the handle belonged to when the token was signed.
    pub uid: Uuid,
    pub exp: i64,
}

/// Signs and checks session tokens with one shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, handle: &str, id: Uuid) -> Result<String, ApiError> {
        let claims = Claims {
            sub: handle.to_string(),
            uid: id,
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "rejected session token");
                ApiError::Unauthorized("Invalid or expired token".into())
            })
    }
}

/// The caller's handle, taken from a valid `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl AuthUser {
    /// Reject requests acting on behalf of someone else.
    pub fn require(&self, handle: &str) -> Result<(), ApiError> {
        if self.0 == handle {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Token does not belong to '{handle}'"
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        let claims = state.tokens.verify(token.trim())?;

        let store = state.store.clone();
        let handle = claims.sub.clone();
        let owner = tokio::task::spawn_blocking(move || store.get_user(&handle))
            .await
            .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))?;
        match owner {
            Ok(user) if user.id == claims.uid => Ok(AuthUser(claims.sub)),
            Ok(_) => {
                tracing::debug!(handle = %claims.sub, "token handle now belongs to another account");
                Err(ApiError::Unauthorized("Invalid or expired token".into()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ApiError::Unauthorized("Invalid or expired token".into()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
