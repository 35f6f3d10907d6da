//! OAuth and linked-account handlers

use axum::extract::{Extension, Json, Path, Query};
use axum::response::Redirect;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::models::{CallbackParams, CompleteLinkRequest, InitiateQuery, LinkRequest};
use crate::auth::models::TokenPair;
use crate::auth::AuthedUser;
use crate::common::{ApiError, AppState};

/// GET /api/auth/providers
///
/// # Response
/// ```json
/// { "providers": ["github", "google"] }
/// ```
pub async fn list_providers(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "providers": state.coordinator.providers().names() }))
}

/// GET /api/auth/oauth/:provider
/// Starts a sign-in flow and redirects the browser to the provider
pub async fn start_login(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<InitiateQuery>,
) -> Result<Redirect, ApiError> {
    let request = state
        .coordinator
        .initiate_authorization(&provider, query.redirect_uri.as_deref(), None)
        .await?;
    Ok(Redirect::to(&request.authorization_url))
}

/// POST /api/auth/oauth/:provider/link
/// Starts a flow that attaches the provider account to the caller.
///
/// The browser has to navigate to the returned URL itself, since the bearer
/// token cannot ride along on a redirect. The provider's answer comes back
/// through the callback, which hands it to the frontend to finish with
/// `POST /api/auth/oauth/:provider/link/complete`.
///
/// # Response
/// ```json
/// { "authorization_url": "https://github.com/login/oauth/authorize?..." }
/// ```
pub async fn start_link(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    body: Option<Json<LinkRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let redirect_uri = body.and_then(|Json(b)| b.redirect_uri);
    let request = state
        .coordinator
        .initiate_authorization(&provider, redirect_uri.as_deref(), Some(&authed.id))
        .await?;

    Ok(Json(serde_json::json!({ "authorization_url": request.authorization_url })))
}

/// GET /api/auth/oauth/:provider/callback
///
/// Always answers with a redirect into the frontend:
/// - sign-in: `/auth/callback#access_token=...&refresh_token=...`
/// - link: `/settings/accounts/link?provider=<provider>&code=...&state=...`,
///   where the signed-in user completes it
/// - failure: `/auth/error?code=<CODE>&message=...`
pub async fn callback(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    let frontend = state.config.frontend_url.as_str();

    match complete_callback(&state, &provider, params).await {
        Ok(CallbackOutcome::SignedIn(pair)) => {
            Redirect::to(&format!("{}/auth/callback#{}", frontend, token_fragment(&pair)))
        }
        Ok(CallbackOutcome::LinkPending { code, state: pending }) => Redirect::to(&format!(
            "{}/settings/accounts/link?provider={}&code={}&state={}",
            frontend,
            urlencoding::encode(&provider),
            urlencoding::encode(&code),
            urlencoding::encode(&pending)
        )),
        Err(e) => {
            warn!(provider = %provider, code = e.code(), error = %e, "OAuth callback failed");
            Redirect::to(&error_location(frontend, &e))
        }
    }
}

/// POST /api/auth/oauth/:provider/link/complete
/// Finishes a link flow for the caller. Only the user that started the flow
/// can complete it.
///
/// # Request Body
/// ```json
/// { "code": "...", "state": "..." }
/// ```
pub async fn complete_link(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    Json(body): Json<CompleteLinkRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let params = CallbackParams {
        code: Some(body.code),
        state: Some(body.state),
        ..Default::default()
    };
    let completed = state
        .coordinator
        .handle_callback(&provider, params, Some(&authed.id))
        .await?;

    state
        .linker
        .link_account(&authed.id, &completed.profile, &completed.tokens)
        .await?;

    debug!(
        user_id = %authed.id,
        email = %authed.log_email(),
        provider = %completed.profile.provider,
        "Account link completed"
    );
    Ok(Json(serde_json::json!({
        "message": "Account linked",
        "provider": completed.profile.provider,
    })))
}

/// GET /api/auth/accounts
///
/// # Response
/// ```json
/// { "accounts": [{ "provider": "github", "provider_account_id": "123", ... }] }
/// ```
pub async fn list_accounts(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let accounts = state.linker.list_accounts(&authed.id).await?;
    Ok(Json(serde_json::json!({ "accounts": accounts })))
}

/// DELETE /api/auth/accounts/:provider
///
/// The provider grant is revoked in the background; a failed revocation does
/// not undo the unlink.
pub async fn unlink_account(
    Extension(state): Extension<Arc<AppState>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let provider = provider.trim().to_lowercase();
    if let Some(token) = state.linker.unlink_account(&authed.id, &provider).await? {
        let coordinator = state.coordinator.clone();
        let provider = provider.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.revoke_grant(&provider, &token).await {
                warn!(provider = %provider, error = %e, "Could not revoke provider grant");
            }
        });
    }
    Ok(Json(serde_json::json!({
        "message": "Account unlinked",
        "provider": provider,
    })))
}

pub(crate) enum CallbackOutcome {
    SignedIn(TokenPair),
    /// A link flow; the browser carries `code` and `state` to the frontend,
    /// which completes it under the user's bearer token
    LinkPending { code: String, state: String },
}

/// Sign in from an anonymous callback, or pass a link flow on untouched
pub(crate) async fn complete_callback(
    state: &AppState,
    provider: &str,
    params: CallbackParams,
) -> Result<CallbackOutcome, ApiError> {
    if let (None, Some(code), Some(pending)) = (&params.error, &params.code, &params.state) {
        if state.coordinator.is_link_flow(pending).await? {
            return Ok(CallbackOutcome::LinkPending {
                code: code.clone(),
                state: pending.clone(),
            });
        }
    }

    let completed = state.coordinator.handle_callback(provider, params, None).await?;
    let profile = &completed.profile;

    let user = state
        .linker
        .resolve_or_create(profile, &completed.tokens)
        .await?;
    let pair = state.issuer.issue_pair(&user.id).await?;

    info!(user_id = %user.id, provider = %profile.provider, "OAuth sign-in complete");
    Ok(CallbackOutcome::SignedIn(pair))
}

fn token_fragment(pair: &TokenPair) -> String {
    format!(
        "access_token={}&refresh_token={}&token_type={}&expires_in={}",
        urlencoding::encode(&pair.access_token),
        urlencoding::encode(&pair.refresh_token),
        urlencoding::encode(&pair.token_type),
        pair.expires_in
    )
}

fn error_location(frontend: &str, error: &ApiError) -> String {
    let mut location = format!("{}/auth/error?code={}", frontend, error.code());
    // Only the provider's own description is forwarded
    if let ApiError::ProviderDenied(Some(description)) = error {
        location.push_str("&message=");
        location.push_str(&urlencoding::encode(description));
    }
    location
}
