//! Authentication handlers

use axum::extract::{Extension, Json};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{info, warn};

use super::error::AccountError;
use super::extractors::AuthedUser;
use super::models::{LoginRequest, NewUser, RefreshRequest, RegisterRequest, RegisterValidator, TokenPair};
use super::passwords::{hash_password, verify_password};
use super::users::normalize_email;
use crate::common::{safe_email_log, safe_token_log, ApiError, AppState, Validator};

/// POST /api/auth/register
/// Creates an email + password account and signs it in
///
/// # Request Body
/// ```json
/// { "email": "user@example.com", "password": "at least 8 chars", "name": "optional" }
/// ```
///
/// # Response
/// `201` with a token pair
pub async fn register(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<TokenPair>), ApiError> {
    let validation = RegisterValidator.validate(&payload);
    if !validation.is_valid() {
        return Err(validation.into());
    }

    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ApiError::InternalServer(format!("hashing task failed: {}", e)))??;

    let user = state
        .users
        .create(&NewUser {
            email: normalize_email(&payload.email),
            name: payload.name.filter(|n| !n.trim().is_empty()),
            password_hash: Some(password_hash),
            avatar_url: None,
        })
        .await?;

    let pair = state.issuer.issue_pair(&user.id).await?;
    info!(user_id = %user.id, email = %safe_email_log(&user.email), "Registered new account");
    Ok((StatusCode::CREATED, Json(pair)))
}

/// POST /api/auth/login
/// Email + password sign-in
///
/// Unknown email, wrong password and OAuth-only accounts all answer
/// `INVALID_CREDENTIALS`.
pub async fn login(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let user = state.users.find_by_email(&payload.email).await?;

    let (user, stored_hash) = match user {
        Some(u) => match u.password_hash.clone() {
            Some(hash) => (u, hash),
            None => {
                warn!(user_id = %u.id, "Password login attempted on OAuth-only account");
                return Err(AccountError::InvalidCredentials.into());
            }
        },
        None => {
            warn!(email = %safe_email_log(&payload.email), "Login for unknown email");
            return Err(AccountError::InvalidCredentials.into());
        }
    };

    let password = payload.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .map_err(|e| ApiError::InternalServer(format!("hashing task failed: {}", e)))?;

    if !verified {
        warn!(user_id = %user.id, "Login failed: wrong password");
        return Err(AccountError::InvalidCredentials.into());
    }

    let pair = state.issuer.issue_pair(&user.id).await?;
    info!(user_id = %user.id, "User logged in");
    Ok(Json(pair))
}

/// POST /api/auth/refresh
/// Rotates a refresh token into a new pair
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if payload.refresh_token.trim().is_empty() {
        return Err(ApiError::ValidationError("refresh_token is required".to_string()));
    }

    let pair = state.issuer.rotate(payload.refresh_token.trim()).await.map_err(|e| {
        warn!(
            token = %safe_token_log(&payload.refresh_token),
            error = %e,
            "Refresh rejected"
        );
        ApiError::from(e)
    })?;
    Ok(Json(pair))
}

/// POST /api/auth/logout
/// Revokes the refresh token's family. Succeeds for unknown tokens too.
///
/// # Response
/// ```json
/// { "message": "Logout successful" }
/// ```
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.issuer.revoke(payload.refresh_token.trim()).await?;
    info!("User logout successful");
    Ok(Json(serde_json::json!({ "message": "Logout successful" })))
}

/// GET /api/me
///
/// # Response
/// ```json
/// { "user": { ... }, "has_password": true }
/// ```
pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state
        .users
        .find_by_id(&authed.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "user": user,
        "has_password": user.has_password(),
    })))
}
