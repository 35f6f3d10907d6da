//! Error kinds raised by the credential and account components

use thiserror::Error;

/// Session credential failures
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,

    /// A refresh token came back after it had already been rotated
    #[error("refresh token reused")]
    Reused,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("credential store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Password account failures
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("email already registered")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error("user store error: {0}")]
    Database(#[from] sqlx::Error),
}
