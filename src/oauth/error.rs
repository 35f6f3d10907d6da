//! Error kinds raised by the OAuth components

use thiserror::Error;

use crate::services::encryption::EncryptionError;

/// State Store failures
#[derive(Debug, Error)]
pub enum StateError {
    #[error("authorization state not found or already used")]
    NotFound,

    #[error("authorization state expired")]
    Expired,

    #[error("state store error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures talking to an OAuth provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider denied authorization: {error}")]
    Denied {
        error: String,
        description: Option<String>,
    },

    #[error("authorization code exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(String),

    #[error("provider request timed out")]
    Timeout,

    #[error("grant revocation failed: {0}")]
    RevocationFailed(String),
}

/// Failures of the authorization-code flow as a whole
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown or unconfigured provider: {0}")]
    UnknownProvider(String),

    #[error("redirect URI not allowed: {0}")]
    InvalidRedirect(String),

    #[error("missing callback parameter: {0}")]
    MissingParameter(&'static str),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Identity Linker failures
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{0}")]
    Conflict(String),

    #[error("an account with this email already exists; sign in and link the provider")]
    AccountExists,

    #[error("cannot unlink the last sign-in method of an account without a password")]
    LastCredential,

    #[error("linked account not found")]
    NotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("provider profile does not include an email address")]
    MissingEmail,

    #[error("token encryption failed: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("identity store error: {0}")]
    Database(#[from] sqlx::Error),
}
