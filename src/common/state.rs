// Application state shared across all modules

use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;

use super::config::AuthConfig;
use crate::auth::tokens::CredentialIssuer;
use crate::auth::users::UserDirectory;
use crate::oauth::client::ProviderClient;
use crate::oauth::coordinator::OAuthCoordinator;
use crate::oauth::linker::IdentityLinker;
use crate::oauth::providers::ProviderRegistry;
use crate::oauth::state_store::StateStore;
use crate::services::TokenCipher;

/// Database pool, configuration and the auth components built on them.
///
/// Everything here is immutable after startup and shared as `Arc<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AuthConfig>,
    pub users: UserDirectory,
    pub issuer: Arc<CredentialIssuer>,
    pub linker: Arc<IdentityLinker>,
    pub states: Arc<StateStore>,
    pub coordinator: Arc<OAuthCoordinator>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: AuthConfig) -> anyhow::Result<Self> {
        let client = ProviderClient::new(config.provider_timeout)
            .context("failed to build provider HTTP client")?;
        Self::with_client(db, config, client)
    }

    /// Same as [`AppState::new`] with a caller-supplied provider client
    pub fn with_client(db: SqlitePool, config: AuthConfig, client: ProviderClient) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let cipher = match &config.encryption_key {
            Some(key) => Some(Arc::new(
                TokenCipher::from_key(key).context("invalid ENCRYPTION_MASTER_KEY")?,
            )),
            None => None,
        };

        let users = UserDirectory::new(db.clone());
        let issuer = Arc::new(CredentialIssuer::new(
            db.clone(),
            &config.jwt_secret,
            config.access_token_ttl,
            config.refresh_token_ttl,
        ));
        let linker = Arc::new(IdentityLinker::new(
            db.clone(),
            users.clone(),
            cipher,
            config.link_policy,
        ));
        let states = Arc::new(StateStore::new(db.clone()));
        let coordinator = Arc::new(OAuthCoordinator::new(
            ProviderRegistry::new(config.providers.clone()),
            states.clone(),
            client,
            config.clone(),
        ));

        Ok(Self {
            db,
            config,
            users,
            issuer,
            linker,
            states,
            coordinator,
        })
    }
}
