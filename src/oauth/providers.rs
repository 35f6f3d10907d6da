//! Provider table
//!
//! The set of supported providers is closed. Which of them are active, and
//! with which credentials, is decided by configuration at startup; the
//! resulting [`ProviderRegistry`] is handed to the coordinator and never
//! changes afterwards.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};
use url::Url;

use super::client::ProviderClient;
use super::error::ProviderError;
use super::models::NormalizedProfile;
use crate::common::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    GitHub,
    Google,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::Google => "google",
        }
    }

    fn client_id_var(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "GITHUB_CLIENT_ID",
            ProviderKind::Google => "GOOGLE_CLIENT_ID",
        }
    }

    fn client_secret_var(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "GITHUB_CLIENT_SECRET",
            ProviderKind::Google => "GOOGLE_CLIENT_SECRET",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "GITHUB",
            ProviderKind::Google => "GOOGLE",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "github" => Ok(ProviderKind::GitHub),
            "google" => Ok(ProviderKind::Google),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Endpoints and credentials of one configured provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    /// GitHub only: where to find the primary verified address
    pub emails_url: Option<String>,
    /// Where a grant is revoked when its identity is unlinked
    pub revoke_url: Option<String>,
    pub scopes: Vec<String>,
    pub extra_authorize_params: Vec<(String, String)>,
}

impl ProviderSettings {
    /// Well-known endpoints for `kind` with the given credentials
    pub fn defaults(kind: ProviderKind, client_id: &str, client_secret: &str) -> Self {
        match kind {
            ProviderKind::GitHub => Self {
                kind,
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                profile_url: "https://api.github.com/user".to_string(),
                emails_url: Some("https://api.github.com/user/emails".to_string()),
                revoke_url: Some(format!("https://api.github.com/applications/{}/grant", client_id)),
                scopes: vec!["read:user".to_string(), "user:email".to_string()],
                extra_authorize_params: Vec::new(),
            },
            ProviderKind::Google => Self {
                kind,
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                profile_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                emails_url: None,
                revoke_url: Some("https://oauth2.googleapis.com/revoke".to_string()),
                scopes: vec![
                    "openid".to_string(),
                    "email".to_string(),
                    "profile".to_string(),
                ],
                extra_authorize_params: vec![
                    ("access_type".to_string(), "offline".to_string()),
                    ("prompt".to_string(), "consent".to_string()),
                ],
            },
        }
    }

    /// Read `<PROVIDER>_CLIENT_ID` / `_CLIENT_SECRET` plus optional endpoint
    /// overrides (`_AUTHORIZE_URL`, `_TOKEN_URL`, `_PROFILE_URL`,
    /// `_EMAILS_URL`, `_REVOKE_URL`, `_SCOPES`).
    pub fn from_lookup<F>(kind: ProviderKind, get: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = get(kind.client_id_var()).ok_or(ConfigError::Missing(kind.client_id_var()))?;
        let client_secret =
            get(kind.client_secret_var()).ok_or(ConfigError::Missing(kind.client_secret_var()))?;

        let mut settings = Self::defaults(kind, &client_id, &client_secret);
        let prefix = kind.env_prefix();

        let url_override = |suffix: &str| -> Result<Option<String>, ConfigError> {
            let key = format!("{}_{}", prefix, suffix);
            match get(&key) {
                Some(value) => {
                    Url::parse(&value).map_err(|e| ConfigError::Invalid {
                        key,
                        reason: e.to_string(),
                    })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        };

        if let Some(v) = url_override("AUTHORIZE_URL")? {
            settings.authorize_url = v;
        }
        if let Some(v) = url_override("TOKEN_URL")? {
            settings.token_url = v;
        }
        if let Some(v) = url_override("PROFILE_URL")? {
            settings.profile_url = v;
        }
        if let Some(v) = url_override("EMAILS_URL")? {
            settings.emails_url = Some(v);
        }
        if let Some(v) = url_override("REVOKE_URL")? {
            settings.revoke_url = Some(v);
        }
        if let Some(scopes) = get(&format!("{}_SCOPES", prefix)) {
            settings.scopes = scopes
                .split(|c| c == ',' || c == ' ')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        Ok(settings)
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Fetch the authenticated user's profile and normalize it
    pub async fn fetch_profile(
        &self,
        client: &ProviderClient,
        access_token: &str,
    ) -> Result<NormalizedProfile, ProviderError> {
        let raw = client.get_json(&self.profile_url, access_token).await?;

        let profile = match self.kind {
            ProviderKind::GitHub => {
                let user: GitHubUser = decode_profile(&raw)?;
                let primary_email = match &self.emails_url {
                    Some(url) => self.fetch_github_primary_email(client, url, access_token).await,
                    None => None,
                };
                ProviderProfile::GitHub {
                    user,
                    primary_email,
                }
            }
            ProviderKind::Google => ProviderProfile::Google(decode_profile(&raw)?),
        };

        Ok(profile.normalize(raw))
    }

    /// Best effort: a missing `user:email` grant must not fail the login
    async fn fetch_github_primary_email(
        &self,
        client: &ProviderClient,
        url: &str,
        access_token: &str,
    ) -> Option<GitHubEmail> {
        match client.get_json(url, access_token).await {
            Ok(raw) => match serde_json::from_value::<Vec<GitHubEmail>>(raw) {
                Ok(emails) => emails.into_iter().find(|e| e.primary && e.verified),
                Err(e) => {
                    warn!(error = %e, "Unexpected GitHub emails payload");
                    None
                }
            },
            Err(e) => {
                debug!(error = %e, "GitHub emails endpoint unavailable, using public profile email");
                None
            }
        }
    }
}

fn decode_profile<T: for<'de> Deserialize<'de>>(raw: &serde_json::Value) -> Result<T, ProviderError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| ProviderError::ProfileFetchFailed(format!("unexpected profile payload: {}", e)))
}

/// `GET https://api.github.com/user`
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// One entry of `GET https://api.github.com/user/emails`
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// OpenID Connect userinfo as returned by Google
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleUserInfo {
    pub sub: String,
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Typed provider payloads
#[derive(Debug, Clone)]
pub enum ProviderProfile {
    GitHub {
        user: GitHubUser,
        primary_email: Option<GitHubEmail>,
    },
    Google(GoogleUserInfo),
}

impl ProviderProfile {
    pub fn normalize(self, raw_payload: serde_json::Value) -> NormalizedProfile {
        match self {
            ProviderProfile::GitHub {
                user,
                primary_email,
            } => {
                // The public profile email is user-controlled and unverified
                let (email, email_verified) = match primary_email {
                    Some(primary) => (Some(primary.email), true),
                    None => (user.email, false),
                };
                NormalizedProfile {
                    provider: ProviderKind::GitHub.to_string(),
                    provider_account_id: user.id.to_string(),
                    email: email.map(|e| e.to_lowercase()),
                    email_verified,
                    display_name: user.name.or_else(|| Some(user.login.clone())),
                    username: Some(user.login),
                    avatar_url: user.avatar_url,
                    raw_payload,
                }
            }
            ProviderProfile::Google(info) => NormalizedProfile {
                provider: ProviderKind::Google.to_string(),
                provider_account_id: info.sub,
                email: info.email.map(|e| e.to_lowercase()),
                email_verified: info.email_verified.unwrap_or(false),
                display_name: info.name,
                username: None,
                avatar_url: info.picture,
                raw_payload,
            },
        }
    }
}

/// Providers enabled for this process, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderSettings>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderSettings>) -> Self {
        Self { providers }
    }

    pub fn get(&self, name: &str) -> Option<&ProviderSettings> {
        let kind: ProviderKind = name.parse().ok()?;
        self.providers.iter().find(|p| p.kind == kind)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(ProviderSettings::name).collect()
    }
}
