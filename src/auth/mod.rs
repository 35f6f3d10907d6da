//! # Auth Module
//!
//! Local accounts and session credentials:
//! - Credential Issuer: access JWTs and rotating refresh tokens
//! - User Directory: the `users` table
//! - Email + password registration and login
//! - AuthedUser extractor for protected routes

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod passwords;
pub mod routes;
pub mod tokens;
pub mod users;

#[cfg(test)]
mod tests;

pub use extractors::AuthedUser;
pub use routes::auth_routes;
