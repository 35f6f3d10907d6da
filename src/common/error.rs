// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::{error, warn};

use super::validation::ValidationResult;
use crate::auth::error::{AccountError, CredentialError};
use crate::oauth::error::{IdentityError, OAuthError, ProviderError, StateError};

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    TokenExpired,
    TokenInvalid,
    RefreshTokenReused,
    InvalidCredentials,
    ValidationError(String),
    StateNotFound,
    StateExpired,
    /// Carries the provider's `error_description`, if any
    ProviderDenied(Option<String>),
    ExchangeFailed,
    ProfileFetchFailed,
    ProviderTimeout,
    IdentityConflict(String),
    AccountExists,
    EmailTaken,
    LastCredential,
    NotFound(String),
    InternalServer(String),
    DatabaseError(sqlx::Error),
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::TokenInvalid => "TOKEN_INVALID",
            ApiError::RefreshTokenReused => "REFRESH_TOKEN_REUSED",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::ValidationError(_) => "VALIDATION_ERROR",
            ApiError::StateNotFound => "STATE_NOT_FOUND",
            ApiError::StateExpired => "STATE_EXPIRED",
            ApiError::ProviderDenied(_) => "PROVIDER_DENIED",
            ApiError::ExchangeFailed => "EXCHANGE_FAILED",
            ApiError::ProfileFetchFailed => "PROFILE_FETCH_FAILED",
            ApiError::ProviderTimeout => "PROVIDER_TIMEOUT",
            ApiError::IdentityConflict(_) => "IDENTITY_CONFLICT",
            ApiError::AccountExists => "ACCOUNT_EXISTS",
            ApiError::EmailTaken => "EMAIL_TAKEN",
            ApiError::LastCredential => "LAST_CREDENTIAL",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InternalServer(_) => "INTERNAL_SERVER_ERROR",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_)
            | ApiError::TokenExpired
            | ApiError::TokenInvalid
            | ApiError::RefreshTokenReused
            | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::ValidationError(_)
            | ApiError::StateNotFound
            | ApiError::StateExpired
            | ApiError::ProviderDenied(_) => StatusCode::BAD_REQUEST,
            ApiError::ExchangeFailed | ApiError::ProfileFetchFailed => StatusCode::BAD_GATEWAY,
            ApiError::ProviderTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::IdentityConflict(_)
            | ApiError::AccountExists
            | ApiError::EmailTaken
            | ApiError::LastCredential => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InternalServer(_) | ApiError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to show a client. Internal detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Unauthorized(msg)
            | ApiError::ValidationError(msg)
            | ApiError::IdentityConflict(msg)
            | ApiError::NotFound(msg) => msg.clone(),
            ApiError::ProviderDenied(Some(description)) => description.clone(),
            ApiError::InternalServer(_) => "Internal server error".to_string(),
            ApiError::DatabaseError(_) => "Database operation failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::TokenExpired => write!(f, "Access token expired"),
            ApiError::TokenInvalid => write!(f, "Invalid token"),
            ApiError::RefreshTokenReused => write!(f, "Refresh token was already used"),
            ApiError::InvalidCredentials => write!(f, "Invalid email or password"),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::StateNotFound => write!(f, "Authorization state not found or already used"),
            ApiError::StateExpired => write!(f, "Authorization state expired"),
            ApiError::ProviderDenied(_) => write!(f, "Provider denied authorization"),
            ApiError::ExchangeFailed => write!(f, "Authorization code exchange failed"),
            ApiError::ProfileFetchFailed => write!(f, "Could not fetch provider profile"),
            ApiError::ProviderTimeout => write!(f, "Provider did not respond in time"),
            ApiError::IdentityConflict(msg) => write!(f, "Identity Conflict: {}", msg),
            ApiError::AccountExists => write!(
                f,
                "An account with this email already exists; sign in and link the provider"
            ),
            ApiError::EmailTaken => write!(f, "Email already registered"),
            ApiError::LastCredential => {
                write!(f, "Cannot remove the last sign-in method of this account")
            }
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match &self {
            ApiError::DatabaseError(e) => error!(error = %e, "Database error occurred"),
            ApiError::InternalServer(msg) => error!(error = %msg, "Internal server error"),
            _ => {}
        }

        let error_response = ErrorResponse {
            error: self.public_message(),
            code: self.code().to_string(),
        };

        (self.status(), Json(error_response)).into_response()
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid() {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            let error_messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            ApiError::ValidationError(error_messages.join(", "))
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::DatabaseError(e)
    }
}

impl From<CredentialError> for ApiError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::Invalid => ApiError::TokenInvalid,
            CredentialError::Expired => ApiError::TokenExpired,
            CredentialError::Reused => ApiError::RefreshTokenReused,
            CredentialError::Signing(msg) => ApiError::InternalServer(msg),
            CredentialError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::EmailTaken => ApiError::EmailTaken,
            AccountError::InvalidCredentials => ApiError::InvalidCredentials,
            AccountError::PasswordHash(msg) => ApiError::InternalServer(msg),
            AccountError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound => ApiError::StateNotFound,
            StateError::Expired => ApiError::StateExpired,
            StateError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        // Raw provider detail is logged, never returned
        match e {
            ProviderError::Denied { description, .. } => ApiError::ProviderDenied(description),
            ProviderError::ExchangeFailed(detail) => {
                warn!(detail = %detail, "Code exchange failed");
                ApiError::ExchangeFailed
            }
            ProviderError::ProfileFetchFailed(detail) => {
                warn!(detail = %detail, "Profile fetch failed");
                ApiError::ProfileFetchFailed
            }
            ProviderError::RevocationFailed(detail) => {
                warn!(detail = %detail, "Grant revocation failed");
                ApiError::InternalServer("provider grant revocation failed".to_string())
            }
            ProviderError::Timeout => ApiError::ProviderTimeout,
        }
    }
}

impl From<OAuthError> for ApiError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::UnknownProvider(name) => {
                ApiError::ValidationError(format!("unknown provider: {}", name))
            }
            OAuthError::InvalidRedirect(uri) => {
                ApiError::ValidationError(format!("redirect_uri not allowed: {}", uri))
            }
            OAuthError::MissingParameter(name) => {
                ApiError::ValidationError(format!("missing {} parameter", name))
            }
            OAuthError::State(e) => e.into(),
            OAuthError::Provider(e) => e.into(),
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::Conflict(msg) => ApiError::IdentityConflict(msg),
            IdentityError::AccountExists => ApiError::AccountExists,
            IdentityError::LastCredential => ApiError::LastCredential,
            IdentityError::NotFound => ApiError::NotFound("linked account not found".to_string()),
            IdentityError::UserNotFound => ApiError::NotFound("user not found".to_string()),
            IdentityError::MissingEmail => ApiError::ValidationError(
                "provider profile does not include an email address".to_string(),
            ),
            IdentityError::Encryption(e) => ApiError::InternalServer(e.to_string()),
            IdentityError::Database(e) => ApiError::DatabaseError(e),
        }
    }
}
