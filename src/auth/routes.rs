//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/register` - Email + password account
/// - `POST /api/auth/login` - Email + password sign-in
/// - `POST /api/auth/refresh` - Rotate a refresh token
/// - `POST /api/auth/logout` - Revoke a refresh token family
/// - `GET /api/me` - Get current user information
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/me", get(handlers::me))
}
