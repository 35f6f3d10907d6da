//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::CredentialError;
use crate::common::{safe_email_log, ApiError, AppState};

/// Authenticated user extractor
///
/// Verifies the bearer access token and loads the user it was issued to.
#[derive(Debug)]
pub struct AuthedUser {
    pub id: String,
    pub email: String,
}

impl AuthedUser {
    /// Masked email for log fields
    pub fn log_email(&self) -> String {
        safe_email_log(&self.email)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let token = match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(t) if !t.trim().is_empty() => t.trim(),
            _ => {
                warn!("Authentication failed: missing bearer token");
                return Err(ApiError::Unauthorized("missing bearer token".into()));
            }
        };

        let user_id = app_state.issuer.verify_access(token).map_err(|e| {
            debug!(error = %e, "Access token rejected");
            match e {
                CredentialError::Expired => ApiError::TokenExpired,
                _ => ApiError::TokenInvalid,
            }
        })?;

        match app_state.users.find_by_id(&user_id).await? {
            Some(user) => {
                debug!(
                    user_id = %user.id,
                    email = %safe_email_log(&user.email),
                    "User authentication successful via extractor"
                );
                Ok(AuthedUser {
                    id: user.id,
                    email: user.email,
                })
            }
            None => {
                warn!(user_id = %user_id, "Authentication failed: user not found in database");
                Err(ApiError::Unauthorized("user not found".into()))
            }
        }
    }
}
