//! OAuth routes

use axum::{
    routing::{delete, get, post},
    Router,
};

use super::handlers;

/// Creates and returns the OAuth router
///
/// # Routes
/// - `GET /api/auth/providers` - Configured provider names
/// - `GET /api/auth/oauth/:provider` - Start sign-in (redirect)
/// - `POST /api/auth/oauth/:provider/link` - Start linking for the caller
/// - `POST /api/auth/oauth/:provider/link/complete` - Finish linking for the caller
/// - `GET /api/auth/oauth/:provider/callback` - Provider redirect target
/// - `GET /api/auth/accounts` - Caller's linked accounts
/// - `DELETE /api/auth/accounts/:provider` - Unlink
pub fn oauth_routes() -> Router {
    Router::new()
        .route("/api/auth/providers", get(handlers::list_providers))
        .route("/api/auth/oauth/:provider", get(handlers::start_login))
        .route("/api/auth/oauth/:provider/link", post(handlers::start_link))
        .route("/api/auth/oauth/:provider/link/complete", post(handlers::complete_link))
        .route("/api/auth/oauth/:provider/callback", get(handlers::callback))
        .route("/api/auth/accounts", get(handlers::list_accounts))
        .route("/api/auth/accounts/:provider", delete(handlers::unlink_account))
}
