// src/common/config.rs
//! Process configuration
//!
//! Everything here is read exactly once in `main` and shared behind an `Arc`
//! afterwards. Nothing mutates it at runtime.

use chrono::Duration;
use std::env;
use thiserror::Error;
use url::Url;

use crate::oauth::providers::{ProviderKind, ProviderSettings};

/// Minimum accepted length for the HMAC signing secret
const MIN_JWT_SECRET_LEN: usize = 32;

// Upper bounds keep expiry arithmetic far from chrono's range limits
const MAX_ACCESS_TTL_MINUTES: i64 = 24 * 60;
const MAX_REFRESH_TTL_DAYS: i64 = 10 * 365;
const MAX_STATE_TTL_MINUTES: i64 = 24 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// What happens when a first-time OAuth login carries an email that already
/// belongs to a local account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPolicy {
    /// Refuse; the owner must sign in and link the provider explicitly.
    Explicit,
    /// Attach the identity to the existing account, but only when the provider
    /// vouches that the email is verified.
    VerifiedEmail,
}

impl LinkPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "explicit" => Some(LinkPolicy::Explicit),
            "verified_email" => Some(LinkPolicy::VerifiedEmail),
            _ => None,
        }
    }
}

/// Immutable service configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub state_ttl: Duration,
    pub state_sweep_interval: std::time::Duration,
    pub provider_timeout: std::time::Duration,
    pub public_base_url: String,
    pub frontend_url: String,
    pub allowed_redirect_origins: Vec<String>,
    pub link_policy: LinkPolicy,
    pub providers: Vec<ProviderSettings>,
    pub encryption_key: Option<String>,
    pub cors_origins: Vec<String>,
    /// Drop and recreate the schema at startup
    pub reset_db: bool,
}

impl AuthConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::invalid(
                "JWT_SECRET",
                format!("must be at least {} bytes", MIN_JWT_SECRET_LEN),
            ));
        }

        let port = parse_or("PORT", get("PORT"), 8080u16)?;
        let access_minutes = parse_or("ACCESS_TOKEN_TTL_MINUTES", get("ACCESS_TOKEN_TTL_MINUTES"), 15i64)?;
        let refresh_days = parse_or("REFRESH_TOKEN_TTL_DAYS", get("REFRESH_TOKEN_TTL_DAYS"), 30i64)?;
        let state_minutes = parse_or("OAUTH_STATE_TTL_MINUTES", get("OAUTH_STATE_TTL_MINUTES"), 10i64)?;
        let sweep_secs = parse_or("OAUTH_STATE_SWEEP_SECS", get("OAUTH_STATE_SWEEP_SECS"), 300u64)?;
        let timeout_secs = parse_or("PROVIDER_TIMEOUT_SECS", get("PROVIDER_TIMEOUT_SECS"), 10u64)?;

        let access_token_ttl = bounded_ttl(
            "ACCESS_TOKEN_TTL_MINUTES",
            access_minutes,
            MAX_ACCESS_TTL_MINUTES,
            Duration::try_minutes,
        )?;
        let refresh_token_ttl = bounded_ttl(
            "REFRESH_TOKEN_TTL_DAYS",
            refresh_days,
            MAX_REFRESH_TTL_DAYS,
            Duration::try_days,
        )?;
        let state_ttl = bounded_ttl(
            "OAUTH_STATE_TTL_MINUTES",
            state_minutes,
            MAX_STATE_TTL_MINUTES,
            Duration::try_minutes,
        )?;

        let public_base_url = get("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", port))
            .trim_end_matches('/')
            .to_string();
        let frontend_url = get("FRONTEND_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        for (key, value) in [("PUBLIC_BASE_URL", &public_base_url), ("FRONTEND_URL", &frontend_url)] {
            Url::parse(value).map_err(|e| ConfigError::invalid(key, e.to_string()))?;
        }

        // The service's own origin is always an acceptable callback target
        let mut allowed_redirect_origins = vec![origin_of(&public_base_url)?];
        if let Some(raw) = get("OAUTH_ALLOWED_REDIRECT_ORIGINS") {
            for entry in split_list(&raw) {
                let origin = origin_of(&entry)?;
                if !allowed_redirect_origins.contains(&origin) {
                    allowed_redirect_origins.push(origin);
                }
            }
        }

        let link_policy = match get("OAUTH_LINK_POLICY") {
            Some(raw) => LinkPolicy::parse(&raw).ok_or_else(|| {
                ConfigError::invalid("OAUTH_LINK_POLICY", "expected `explicit` or `verified_email`")
            })?,
            None => LinkPolicy::Explicit,
        };

        let mut providers = Vec::new();
        if let Some(raw) = get("OAUTH_PROVIDERS") {
            for name in split_list(&raw) {
                let kind: ProviderKind = name
                    .parse()
                    .map_err(|_| ConfigError::invalid("OAUTH_PROVIDERS", format!("unknown provider `{}`", name)))?;
                if providers.iter().any(|p: &ProviderSettings| p.kind == kind) {
                    continue;
                }
                providers.push(ProviderSettings::from_lookup(kind, &get)?);
            }
        }

        let cors_origins = split_list(
            &get("CORS_ORIGINS").unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string()),
        );

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://authd.db".to_string()),
            port,
            jwt_secret,
            access_token_ttl,
            refresh_token_ttl,
            state_ttl,
            state_sweep_interval: std::time::Duration::from_secs(sweep_secs.max(1)),
            provider_timeout: std::time::Duration::from_secs(timeout_secs.max(1)),
            public_base_url,
            frontend_url,
            allowed_redirect_origins,
            link_policy,
            providers,
            encryption_key: get("ENCRYPTION_MASTER_KEY"),
            cors_origins,
            reset_db: get("RESET_DB").map(|v| v == "true").unwrap_or(false),
        })
    }

    /// Default OAuth callback for a provider, served by this process
    pub fn default_redirect_uri(&self, provider: &str) -> String {
        format!("{}/api/auth/oauth/{}/callback", self.public_base_url, provider)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        None => Ok(default),
    }
}

fn bounded_ttl(
    key: &str,
    value: i64,
    max: i64,
    make: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::invalid(key, "must be positive"));
    }
    if value > max {
        return Err(ConfigError::invalid(key, format!("must be at most {}", max)));
    }
    make(value).ok_or_else(|| ConfigError::invalid(key, "out of range"))
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn origin_of(raw: &str) -> Result<String, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::invalid("OAUTH_ALLOWED_REDIRECT_ORIGINS", e.to_string()))?;
    Ok(url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_missing_jwt_secret_is_fatal() {
        let result = AuthConfig::from_lookup(lookup(&[]));
        assert!(matches!(result, Err(ConfigError::Missing("JWT_SECRET"))));
    }

    #[test]
    fn test_short_jwt_secret_rejected() {
        let result = AuthConfig::from_lookup(lookup(&[("JWT_SECRET", "short")]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_defaults() {
        let config = AuthConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.access_token_ttl, Duration::minutes(15));
        assert_eq!(config.refresh_token_ttl, Duration::days(30));
        assert_eq!(config.state_ttl, Duration::minutes(10));
        assert_eq!(config.link_policy, LinkPolicy::Explicit);
        assert!(config.providers.is_empty());
        assert_eq!(config.allowed_redirect_origins, vec!["http://localhost:8080".to_string()]);
        assert_eq!(
            config.default_redirect_uri("github"),
            "http://localhost:8080/api/auth/oauth/github/callback"
        );
    }

    #[test]
    fn test_providers_and_policy() {
        let config = AuthConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("OAUTH_PROVIDERS", "github, google, github"),
            ("GITHUB_CLIENT_ID", "gh-id"),
            ("GITHUB_CLIENT_SECRET", "gh-secret"),
            ("GOOGLE_CLIENT_ID", "g-id"),
            ("GOOGLE_CLIENT_SECRET", "g-secret"),
            ("OAUTH_LINK_POLICY", "verified_email"),
            ("OAUTH_ALLOWED_REDIRECT_ORIGINS", "https://app.example.com/some/path"),
        ]))
        .unwrap();

        assert_eq!(config.providers.len(), 2);
        assert_eq!(config.providers[0].kind, ProviderKind::GitHub);
        assert_eq!(config.providers[1].client_id, "g-id");
        assert_eq!(config.link_policy, LinkPolicy::VerifiedEmail);
        assert!(config
            .allowed_redirect_origins
            .contains(&"https://app.example.com".to_string()));
    }

    #[test]
    fn test_provider_without_credentials_is_fatal() {
        let result = AuthConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("OAUTH_PROVIDERS", "github"),
        ]));
        assert!(matches!(result, Err(ConfigError::Missing("GITHUB_CLIENT_ID"))));
    }

    #[test]
    fn test_out_of_range_ttls_rejected() {
        for (key, value) in [
            ("ACCESS_TOKEN_TTL_MINUTES", "9223372036854775807"),
            ("REFRESH_TOKEN_TTL_DAYS", "9223372036854775807"),
            ("OAUTH_STATE_TTL_MINUTES", "0"),
            ("REFRESH_TOKEN_TTL_DAYS", "-3"),
        ] {
            let result = AuthConfig::from_lookup(lookup(&[("JWT_SECRET", SECRET), (key, value)]));
            assert!(
                matches!(result, Err(ConfigError::Invalid { key: ref k, .. }) if k == key),
                "{}={} accepted",
                key,
                value
            );
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result = AuthConfig::from_lookup(lookup(&[
            ("JWT_SECRET", SECRET),
            ("OAUTH_PROVIDERS", "myspace"),
        ]));
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }
}
