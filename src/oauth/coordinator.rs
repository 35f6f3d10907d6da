//! Authorization-code flow orchestration
//!
//! Owns the provider side of the flow only: building the authorization URL,
//! validating the callback and turning a code into a normalized profile.
//! Deciding which local user the profile belongs to is left to the
//! [`IdentityLinker`](super::linker::IdentityLinker).

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use super::client::ProviderClient;
use super::error::{OAuthError, ProviderError, StateError};
use super::models::{CallbackParams, CompletedAuthorization, PendingAuthorization};
use super::pkce::{generate_pkce_pair, generate_state, CHALLENGE_METHOD};
use super::providers::{ProviderRegistry, ProviderSettings};
use super::state_store::StateStore;
use crate::common::config::AuthConfig;

/// URL to send the browser to, plus the state it carries
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
}

pub struct OAuthCoordinator {
    providers: ProviderRegistry,
    states: Arc<StateStore>,
    client: ProviderClient,
    config: Arc<AuthConfig>,
}

impl OAuthCoordinator {
    pub fn new(
        providers: ProviderRegistry,
        states: Arc<StateStore>,
        client: ProviderClient,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            providers,
            states,
            client,
            config,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Start a flow: persist state + PKCE verifier and build the provider URL.
    ///
    /// `link_user_id` marks the flow as an account-link request by an
    /// already authenticated user.
    pub async fn initiate_authorization(
        &self,
        provider: &str,
        redirect_uri: Option<&str>,
        link_user_id: Option<&str>,
    ) -> Result<AuthorizationRequest, OAuthError> {
        let settings = self.provider(provider)?;
        let redirect_uri = self.resolve_redirect_uri(settings, redirect_uri)?;

        let pkce = generate_pkce_pair();
        let state = generate_state();
        let now = Utc::now();

        let record = PendingAuthorization {
            state: state.clone(),
            provider: settings.name().to_string(),
            code_verifier: pkce.code_verifier,
            redirect_uri: redirect_uri.clone(),
            link_user_id: link_user_id.map(str::to_string),
            expires_at: (now + self.config.state_ttl).timestamp(),
            created_at: now.timestamp(),
        };
        self.states.put(&record).await?;

        let scope = settings.scope_param();
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("client_id", settings.client_id.as_str()),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", scope.as_str()),
            ("state", state.as_str()),
            ("code_challenge", pkce.code_challenge.as_str()),
            ("code_challenge_method", CHALLENGE_METHOD),
        ];
        for (key, value) in &settings.extra_authorize_params {
            params.push((key.as_str(), value.as_str()));
        }

        let authorization_url = Url::parse_with_params(&settings.authorize_url, &params)
            .map_err(|e| OAuthError::InvalidRedirect(format!("bad authorize endpoint: {}", e)))?
            .to_string();

        info!(
            provider = %settings.kind,
            linking = link_user_id.is_some(),
            "Started OAuth authorization"
        );

        Ok(AuthorizationRequest {
            authorization_url,
            state,
        })
    }

    /// Whether `state` was issued for an account-link flow
    pub async fn is_link_flow(&self, state: &str) -> Result<bool, OAuthError> {
        Ok(self.states.is_link_flow(state).await?)
    }

    /// Validate a provider redirect and resolve it into a normalized profile.
    ///
    /// `caller` is the authenticated user finishing the flow. It must equal
    /// the user that started it: `None` completes sign-in flows only, and a
    /// link flow completes only for the user that requested it. A mismatch
    /// consumes the state and reports it as not found.
    pub async fn handle_callback(
        &self,
        provider: &str,
        params: CallbackParams,
        caller: Option<&str>,
    ) -> Result<CompletedAuthorization, OAuthError> {
        // A denial is final; the state is left to expire
        if let Some(error) = params.error {
            warn!(provider = %provider, oauth_error = %error, "Provider denied authorization");
            return Err(ProviderError::Denied {
                error,
                description: params.error_description,
            }
            .into());
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::MissingParameter("code"))?;
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or(OAuthError::MissingParameter("state"))?;
        let settings = self.provider(provider)?;

        let pending = self.states.consume_if_valid(&state).await?;
        if pending.provider != settings.name() {
            warn!(
                expected = %pending.provider,
                actual = %settings.kind,
                "Authorization state presented to the wrong provider callback"
            );
            return Err(StateError::NotFound.into());
        }
        if pending.link_user_id.as_deref() != caller {
            warn!(
                provider = %settings.kind,
                linking = pending.link_user_id.is_some(),
                "Authorization state completed by a different user than started it"
            );
            return Err(StateError::NotFound.into());
        }

        let tokens = self
            .client
            .exchange_code(settings, &code, &pending.code_verifier, &pending.redirect_uri)
            .await?;

        let profile = settings.fetch_profile(&self.client, &tokens.access_token).await?;

        info!(
            provider = %settings.kind,
            provider_account_id = %profile.provider_account_id,
            "OAuth callback verified"
        );

        Ok(CompletedAuthorization { profile, tokens })
    }

    /// Revoke a grant at the provider after its identity was unlinked
    pub async fn revoke_grant(&self, provider: &str, access_token: &str) -> Result<(), OAuthError> {
        let settings = self.provider(provider)?;
        self.client.revoke_token(settings, access_token).await?;
        info!(provider = %settings.kind, "Provider grant revoked");
        Ok(())
    }

    fn provider(&self, name: &str) -> Result<&ProviderSettings, OAuthError> {
        self.providers
            .get(name)
            .ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))
    }

    /// Requested callback URI, or this service's own callback for `settings`
    fn resolve_redirect_uri(
        &self,
        settings: &ProviderSettings,
        requested: Option<&str>,
    ) -> Result<String, OAuthError> {
        let requested = match requested.map(str::trim).filter(|r| !r.is_empty()) {
            Some(r) => r,
            None => return Ok(self.config.default_redirect_uri(settings.name())),
        };

        let url = Url::parse(requested).map_err(|_| OAuthError::InvalidRedirect(requested.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.fragment().is_some() {
            return Err(OAuthError::InvalidRedirect(requested.to_string()));
        }

        let origin = url.origin().ascii_serialization();
        if !self.config.allowed_redirect_origins.contains(&origin) {
            warn!(origin = %origin, "Rejected redirect URI outside the allow-list");
            return Err(OAuthError::InvalidRedirect(requested.to_string()));
        }

        Ok(url.to_string())
    }
}
