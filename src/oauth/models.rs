//! OAuth data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Server-side record of an authorization request awaiting its callback
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub provider: String,
    pub code_verifier: String,
    pub redirect_uri: String,
    /// Set when an authenticated user started the flow to link an account
    pub link_user_id: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
    pub created_at: i64,
}

impl PendingAuthorization {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Provider profile reduced to the shape the Identity Linker understands
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedProfile {
    pub provider: String,
    pub provider_account_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub raw_payload: serde_json::Value,
}

/// Tokens issued by the provider's token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until `access_token` expires, when the provider says
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Raw token endpoint body. GitHub reports failures with HTTP 200 and an
/// `error` field, so every field is optional.
#[derive(Debug, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Result of a successful callback
#[derive(Debug, Clone)]
pub struct CompletedAuthorization {
    pub profile: NormalizedProfile,
    pub tokens: ProviderTokens,
}

/// Query string of the provider redirect
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Query string of the login initiation endpoint
#[derive(Debug, Default, Deserialize)]
pub struct InitiateQuery {
    pub redirect_uri: Option<String>,
}

/// Body of the link initiation endpoint
#[derive(Debug, Default, Deserialize)]
pub struct LinkRequest {
    pub redirect_uri: Option<String>,
}

/// Body of the link completion endpoint: the `code` and `state` the provider
/// redirect carried
#[derive(Debug, Deserialize)]
pub struct CompleteLinkRequest {
    pub code: String,
    pub state: String,
}

/// Linked account as shown to its owner. Provider tokens never leave the server.
#[derive(FromRow, Serialize, Debug, Clone)]
pub struct LinkedAccount {
    pub provider: String,
    pub provider_account_id: String,
    pub provider_email: Option<String>,
    pub provider_username: Option<String>,
    pub provider_avatar_url: Option<String>,
    pub created_at: Option<String>,
}
