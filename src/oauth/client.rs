//! HTTP client for provider token and profile endpoints

use reqwest::{header::ACCEPT, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, warn};

use super::error::ProviderError;
use super::models::{ProviderTokens, TokenEndpointResponse};
use super::providers::{ProviderKind, ProviderSettings};

/// Profile fetch attempts, first try included
const MAX_PROFILE_ATTEMPTS: u32 = 3;

/// Provider error bodies are logged, never returned; keep the logs bounded
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    base_backoff: Duration,
}

impl ProviderClient {
    /// Every request is bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("authd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_backoff: Duration::from_millis(200),
        })
    }

    /// Override the delay before the first profile retry (doubles afterwards)
    pub fn with_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Exchange an authorization code for provider tokens.
    ///
    /// The code is single-use at the provider, so this is attempted exactly once.
    pub async fn exchange_code(
        &self,
        provider: &ProviderSettings,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokens, ProviderError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.as_str()),
            ("code_verifier", code_verifier),
        ];

        debug!(provider = %provider.kind, "Exchanging authorization code");

        let response = self
            .http
            .post(&provider.token_url)
            .header(ACCEPT, "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(provider = %provider.kind, "Token endpoint timed out");
                    ProviderError::Timeout
                } else {
                    error!(provider = %provider.kind, error = %e, "Token endpoint unreachable");
                    ProviderError::ExchangeFailed("token endpoint unreachable".to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                provider = %provider.kind,
                http_status = %status,
                body = %truncate(&body),
                "Token endpoint rejected authorization code"
            );
            return Err(ProviderError::ExchangeFailed(format!(
                "token endpoint returned {}",
                status.as_u16()
            )));
        }

        let body: TokenEndpointResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::ExchangeFailed(format!("malformed token response: {}", e))
            }
        })?;

        if let Some(err) = body.error {
            warn!(
                provider = %provider.kind,
                oauth_error = %err,
                description = ?body.error_description,
                "Token endpoint returned an OAuth error"
            );
            return Err(ProviderError::ExchangeFailed(err));
        }

        if let Some(token_type) = &body.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(ProviderError::ExchangeFailed(format!(
                    "unsupported token type: {}",
                    token_type
                )));
            }
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProviderError::ExchangeFailed("response missing access_token".to_string()))?;

        Ok(ProviderTokens {
            access_token,
            refresh_token: body.refresh_token,
            expires_in: body.expires_in,
            scope: body.scope,
        })
    }

    /// Revoke the grant behind `access_token`. Attempted once; providers
    /// without a revocation endpoint are skipped.
    pub async fn revoke_token(
        &self,
        provider: &ProviderSettings,
        access_token: &str,
    ) -> Result<(), ProviderError> {
        let url = match provider.revoke_url.as_deref() {
            Some(url) => url,
            None => return Ok(()),
        };

        let request = match provider.kind {
            ProviderKind::GitHub => self
                .http
                .delete(url)
                .basic_auth(&provider.client_id, Some(&provider.client_secret))
                .header(ACCEPT, "application/vnd.github+json")
                .json(&serde_json::json!({ "access_token": access_token })),
            ProviderKind::Google => self.http.post(url).form(&[("token", access_token)]),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::RevocationFailed("revocation endpoint unreachable".to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(provider = %provider.kind, "Revoked provider grant");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            provider = %provider.kind,
            http_status = %status,
            body = %truncate(&body),
            "Revocation endpoint rejected token"
        );
        Err(ProviderError::RevocationFailed(format!(
            "revocation endpoint returned {}",
            status.as_u16()
        )))
    }

    /// GET a JSON resource with the provider access token.
    ///
    /// Idempotent, so transport errors, timeouts, 429 and 5xx are retried with
    /// exponential backoff up to [`MAX_PROFILE_ATTEMPTS`] times.
    pub async fn get_json(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let mut last_error = ProviderError::ProfileFetchFailed("no attempt made".to_string());

        for attempt in 1..=MAX_PROFILE_ATTEMPTS {
            if attempt > 1 {
                let delay = self.base_backoff * 2u32.pow(attempt - 2);
                debug!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "Retrying profile fetch");
                tokio::time::sleep(delay).await;
            }

            let result = self
                .http
                .get(url)
                .bearer_auth(access_token)
                .header(ACCEPT, "application/json")
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    warn!(url = %url, attempt, "Profile request timed out");
                    last_error = ProviderError::Timeout;
                    continue;
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Profile request failed");
                    last_error = ProviderError::ProfileFetchFailed("profile endpoint unreachable".to_string());
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.json::<serde_json::Value>().await.map_err(|e| {
                    if e.is_timeout() {
                        ProviderError::Timeout
                    } else {
                        ProviderError::ProfileFetchFailed(format!("malformed profile response: {}", e))
                    }
                });
            }

            let body = response.text().await.unwrap_or_default();
            warn!(
                url = %url,
                attempt,
                http_status = %status,
                body = %truncate(&body),
                "Profile endpoint returned an error"
            );
            last_error = ProviderError::ProfileFetchFailed(format!(
                "profile endpoint returned {}",
                status.as_u16()
            ));

            if !is_retryable(status) {
                break;
            }
        }

        Err(last_error)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_LOGGED_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
