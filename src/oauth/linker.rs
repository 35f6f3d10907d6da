//! Identity Linker
//!
//! Maps `(provider, provider_account_id)` pairs onto local users. Every
//! ownership rule is enforced by the store itself: the conditional upsert
//! below never reassigns an identity, `UNIQUE(user_id, provider)` keeps one
//! account per provider and unlinking is a single guarded DELETE.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::error::IdentityError;
use super::models::{LinkedAccount, NormalizedProfile, ProviderTokens};
use crate::auth::error::AccountError;
use crate::auth::models::{NewUser, User};
use crate::auth::users::UserDirectory;
use crate::common::config::LinkPolicy;
use crate::common::{generate_identity_id, safe_email_log};
use crate::services::encryption::{open_optional, seal_optional, TokenCipher};

const UPSERT_IDENTITY: &str = r#"
    INSERT INTO external_identities (
        id, user_id, provider, provider_account_id,
        provider_email, provider_username, provider_avatar_url,
        provider_access_token, provider_refresh_token, token_expires_at,
        raw_profile, created_at, updated_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'), datetime('now'))
    ON CONFLICT(provider, provider_account_id) DO UPDATE SET
        provider_email = excluded.provider_email,
        provider_username = excluded.provider_username,
        provider_avatar_url = excluded.provider_avatar_url,
        provider_access_token = excluded.provider_access_token,
        provider_refresh_token = COALESCE(excluded.provider_refresh_token, external_identities.provider_refresh_token),
        token_expires_at = excluded.token_expires_at,
        raw_profile = excluded.raw_profile,
        updated_at = datetime('now')
    WHERE external_identities.user_id = excluded.user_id
"#;

pub struct IdentityLinker {
    db: SqlitePool,
    users: UserDirectory,
    cipher: Option<Arc<TokenCipher>>,
    policy: LinkPolicy,
}

impl IdentityLinker {
    pub fn new(
        db: SqlitePool,
        users: UserDirectory,
        cipher: Option<Arc<TokenCipher>>,
        policy: LinkPolicy,
    ) -> Self {
        Self {
            db,
            users,
            cipher,
            policy,
        }
    }

    /// Find the local user behind a provider login, provisioning one on first
    /// sight. An email already owned by a local account is only attached
    /// under [`LinkPolicy::VerifiedEmail`] with a provider-verified address.
    pub async fn resolve_or_create(
        &self,
        profile: &NormalizedProfile,
        tokens: &ProviderTokens,
    ) -> Result<User, IdentityError> {
        if let Some(user_id) = self.owner_of(profile).await? {
            if !self.upsert(&user_id, profile, tokens).await? {
                // Relinked elsewhere between the lookup and the refresh
                return Err(IdentityError::Conflict("identity changed owner".to_string()));
            }
            debug!(user_id = %user_id, provider = %profile.provider, "Resolved existing identity");
            return self.load_user(&user_id).await;
        }

        let email = profile
            .email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(IdentityError::MissingEmail)?;

        if let Some(existing) = self.users.find_by_email(email).await? {
            let may_link = self.policy == LinkPolicy::VerifiedEmail && profile.email_verified;
            if !may_link {
                info!(
                    email = %safe_email_log(email),
                    provider = %profile.provider,
                    "OAuth login matches an existing account, explicit link required"
                );
                return Err(IdentityError::AccountExists);
            }

            self.link_account(&existing.id, profile, tokens).await?;
            info!(user_id = %existing.id, provider = %profile.provider, "Auto-linked identity by verified email");
            return self.load_user(&existing.id).await;
        }

        self.provision(email, profile, tokens).await
    }

    /// Attach an identity to `user_id`, or refresh it if that user already
    /// owns it
    pub async fn link_account(
        &self,
        user_id: &str,
        profile: &NormalizedProfile,
        tokens: &ProviderTokens,
    ) -> Result<(), IdentityError> {
        let linked = self.upsert(user_id, profile, tokens).await?;
        if !linked {
            warn!(
                user_id = %user_id,
                provider = %profile.provider,
                provider_account_id = %profile.provider_account_id,
                "Identity already linked to a different user"
            );
            return Err(IdentityError::Conflict(format!(
                "this {} account is already linked to another user",
                profile.provider
            )));
        }

        if let Some(avatar) = &profile.avatar_url {
            self.users.set_avatar_if_missing(user_id, avatar).await?;
        }

        info!(user_id = %user_id, provider = %profile.provider, "Linked external identity");
        Ok(())
    }

    /// Remove the user's identity for `provider`, unless it is their last way
    /// to sign in.
    ///
    /// Returns the removed identity's provider access token, opened, so the
    /// grant can be revoked at the provider.
    pub async fn unlink_account(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<String>, IdentityError> {
        let removed: Option<(Option<String>,)> = sqlx::query_as(
            r#"
            DELETE FROM external_identities
            WHERE user_id = ?
              AND provider = ?
              AND (
                  (SELECT password_hash FROM users WHERE id = ?) IS NOT NULL
                  OR (SELECT COUNT(*) FROM external_identities WHERE user_id = ?) > 1
              )
            RETURNING provider_access_token
            "#,
        )
        .bind(user_id)
        .bind(provider)
        .bind(user_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        if let Some((stored,)) = removed {
            info!(user_id = %user_id, provider = %provider, "Unlinked external identity");
            // The identity is gone either way; an unreadable token only skips revocation
            return Ok(open_optional(self.cipher.as_deref(), stored.as_deref()).unwrap_or_else(|e| {
                warn!(user_id = %user_id, provider = %provider, error = %e, "Stored provider token unreadable");
                None
            }));
        }

        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM external_identities WHERE user_id = ? AND provider = ?")
                .bind(user_id)
                .bind(provider)
                .fetch_optional(&self.db)
                .await?;

        match exists {
            Some(_) => {
                warn!(user_id = %user_id, provider = %provider, "Refused to unlink last credential");
                Err(IdentityError::LastCredential)
            }
            None => Err(IdentityError::NotFound),
        }
    }

    pub async fn list_accounts(&self, user_id: &str) -> Result<Vec<LinkedAccount>, IdentityError> {
        let accounts = sqlx::query_as::<_, LinkedAccount>(
            r#"
            SELECT provider, provider_account_id, provider_email, provider_username,
                   provider_avatar_url, created_at
            FROM external_identities
            WHERE user_id = ?
            ORDER BY created_at, provider
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;
        Ok(accounts)
    }

    /// New passwordless user plus identity, in one transaction
    async fn provision(
        &self,
        email: &str,
        profile: &NormalizedProfile,
        tokens: &ProviderTokens,
    ) -> Result<User, IdentityError> {
        let new_user = NewUser {
            email: email.to_string(),
            name: profile.display_name.clone().or_else(|| profile.username.clone()),
            password_hash: None,
            avatar_url: profile.avatar_url.clone(),
        };

        let mut tx = self.db.begin().await?;

        let user_id = match UserDirectory::insert(&mut tx, &new_user).await {
            Ok(id) => id,
            Err(AccountError::EmailTaken) => {
                tx.rollback().await?;
                // A concurrent first login for this identity got there first;
                // otherwise a registration took the email
                return match self.owner_of(profile).await? {
                    Some(owner) => {
                        debug!(user_id = %owner, provider = %profile.provider, "Concurrent first login resolved");
                        self.load_user(&owner).await
                    }
                    None => Err(IdentityError::AccountExists),
                };
            }
            Err(AccountError::Database(e)) => return Err(e.into()),
            Err(e) => return Err(IdentityError::Conflict(e.to_string())),
        };

        match self.upsert_on(&mut tx, &user_id, profile, tokens).await {
            Ok(true) => {}
            Ok(false) => {
                // A concurrent first login for the same identity won
                tx.rollback().await?;
                return match self.owner_of(profile).await? {
                    Some(owner) => self.load_user(&owner).await,
                    None => Err(IdentityError::Conflict("identity changed owner".to_string())),
                };
            }
            Err(e) => return Err(e),
        }

        tx.commit().await?;

        info!(
            user_id = %user_id,
            email = %safe_email_log(email),
            provider = %profile.provider,
            "Provisioned user from OAuth login"
        );
        self.load_user(&user_id).await
    }

    async fn owner_of(&self, profile: &NormalizedProfile) -> Result<Option<String>, IdentityError> {
        let owner: Option<(String,)> = sqlx::query_as(
            "SELECT user_id FROM external_identities WHERE provider = ? AND provider_account_id = ?",
        )
        .bind(&profile.provider)
        .bind(&profile.provider_account_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(owner.map(|(id,)| id))
    }

    async fn load_user(&self, user_id: &str) -> Result<User, IdentityError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(IdentityError::UserNotFound)
    }

    async fn upsert(
        &self,
        user_id: &str,
        profile: &NormalizedProfile,
        tokens: &ProviderTokens,
    ) -> Result<bool, IdentityError> {
        let mut conn = self.db.acquire().await?;
        self.upsert_on(&mut conn, user_id, profile, tokens).await
    }

    /// Returns false when the identity belongs to someone else
    async fn upsert_on(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        profile: &NormalizedProfile,
        tokens: &ProviderTokens,
    ) -> Result<bool, IdentityError> {
        let cipher = self.cipher.as_deref();
        let access_token = seal_optional(cipher, Some(&tokens.access_token))?;
        let refresh_token = seal_optional(cipher, tokens.refresh_token.as_deref())?;
        let token_expires_at = tokens.expires_in.map(|secs| Utc::now().timestamp() + secs);

        let result = sqlx::query(UPSERT_IDENTITY)
            .bind(generate_identity_id())
            .bind(user_id)
            .bind(&profile.provider)
            .bind(&profile.provider_account_id)
            .bind(profile.email.as_deref())
            .bind(profile.username.as_deref())
            .bind(profile.avatar_url.as_deref())
            .bind(access_token)
            .bind(refresh_token)
            .bind(token_expires_at)
            .bind(profile.raw_payload.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("UNIQUE constraint failed: external_identities.user_id") {
                    IdentityError::Conflict(format!(
                        "a different {} account is already linked to this user",
                        profile.provider
                    ))
                } else if message.contains("FOREIGN KEY constraint failed") {
                    IdentityError::UserNotFound
                } else {
                    IdentityError::Database(e)
                }
            })?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::passwords::hash_password;
    use crate::common::test_support::test_pool;
    use serde_json::json;

    fn profile(provider: &str, account_id: &str, email: Option<&str>, verified: bool) -> NormalizedProfile {
        NormalizedProfile {
            provider: provider.to_string(),
            provider_account_id: account_id.to_string(),
            email: email.map(str::to_string),
            email_verified: verified,
            display_name: Some("Octo Cat".to_string()),
            username: Some("octocat".to_string()),
            avatar_url: Some("https://avatars.example.com/1".to_string()),
            raw_payload: json!({ "id": account_id }),
        }
    }

    fn tokens(access: &str) -> ProviderTokens {
        ProviderTokens {
            access_token: access.to_string(),
            refresh_token: Some("provider-refresh".to_string()),
            expires_in: Some(3600),
            scope: None,
        }
    }

    async fn linker(policy: LinkPolicy) -> (IdentityLinker, UserDirectory, SqlitePool) {
        let pool = test_pool().await;
        let users = UserDirectory::new(pool.clone());
        let linker = IdentityLinker::new(pool.clone(), users.clone(), None, policy);
        (linker, users, pool)
    }

    async fn password_user(users: &UserDirectory, email: &str) -> User {
        users
            .create(&NewUser {
                email: email.to_string(),
                password_hash: Some(hash_password("hunter2hunter2").unwrap()),
                ..Default::default()
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_login_provisions_passwordless_user() {
        let (linker, _, _) = linker(LinkPolicy::Explicit).await;
        let p = profile("github", "123", Some("octo@example.com"), true);

        let user = linker.resolve_or_create(&p, &tokens("a1")).await.unwrap();
        assert_eq!(user.email, "octo@example.com");
        assert_eq!(user.name.as_deref(), Some("Octo Cat"));
        assert!(!user.has_password());

        let again = linker.resolve_or_create(&p, &tokens("a2")).await.unwrap();
        assert_eq!(again.id, user.id);

        let accounts = linker.list_accounts(&user.id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider_account_id, "123");
    }

    #[tokio::test]
    async fn test_missing_email_cannot_provision() {
        let (linker, _, _) = linker(LinkPolicy::Explicit).await;
        let p = profile("github", "123", None, false);
        assert!(matches!(
            linker.resolve_or_create(&p, &tokens("a")).await,
            Err(IdentityError::MissingEmail)
        ));
    }

    #[tokio::test]
    async fn test_explicit_policy_refuses_email_collision() {
        let (linker, users, _) = linker(LinkPolicy::Explicit).await;
        password_user(&users, "octo@example.com").await;

        let p = profile("github", "123", Some("octo@example.com"), true);
        assert!(matches!(
            linker.resolve_or_create(&p, &tokens("a")).await,
            Err(IdentityError::AccountExists)
        ));
    }

    #[tokio::test]
    async fn test_verified_email_policy_links_only_verified() {
        let (linker, users, _) = linker(LinkPolicy::VerifiedEmail).await;
        let owner = password_user(&users, "octo@example.com").await;

        let unverified = profile("github", "123", Some("octo@example.com"), false);
        assert!(matches!(
            linker.resolve_or_create(&unverified, &tokens("a")).await,
            Err(IdentityError::AccountExists)
        ));

        let verified = profile("google", "g-1", Some("octo@example.com"), true);
        let user = linker.resolve_or_create(&verified, &tokens("a")).await.unwrap();
        assert_eq!(user.id, owner.id);
        assert_eq!(user.avatar_url.as_deref(), Some("https://avatars.example.com/1"));
    }

    #[tokio::test]
    async fn test_losing_first_login_resolves_to_winner() {
        let (linker, users, _) = linker(LinkPolicy::Explicit).await;
        let p = profile("github", "77", Some("race@example.com"), true);
        let winner = linker.resolve_or_create(&p, &tokens("a")).await.unwrap();

        // The loser missed the identity lookup and now collides on the email
        let loser = linker.provision("race@example.com", &p, &tokens("b")).await.unwrap();
        assert_eq!(loser.id, winner.id);

        // A registration holding the email is still reported as such
        password_user(&users, "taken@example.com").await;
        let other = profile("github", "78", Some("taken@example.com"), true);
        assert!(matches!(
            linker.provision("taken@example.com", &other, &tokens("c")).await,
            Err(IdentityError::AccountExists)
        ));
    }

    #[tokio::test]
    async fn test_link_conflict_keeps_owner() {
        let (linker, users, _) = linker(LinkPolicy::Explicit).await;
        let alice = password_user(&users, "alice@example.com").await;
        let bob = password_user(&users, "bob@example.com").await;
        let p = profile("github", "123", Some("gh@example.com"), true);

        linker.link_account(&alice.id, &p, &tokens("a")).await.unwrap();
        // Same owner again is a refresh, not a conflict
        linker.link_account(&alice.id, &p, &tokens("b")).await.unwrap();

        assert!(matches!(
            linker.link_account(&bob.id, &p, &tokens("c")).await,
            Err(IdentityError::Conflict(_))
        ));
        assert_eq!(linker.list_accounts(&alice.id).await.unwrap().len(), 1);
        assert!(linker.list_accounts(&bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_account_per_provider() {
        let (linker, users, _) = linker(LinkPolicy::Explicit).await;
        let alice = password_user(&users, "alice@example.com").await;

        linker
            .link_account(&alice.id, &profile("github", "1", None, false), &tokens("a"))
            .await
            .unwrap();
        assert!(matches!(
            linker
                .link_account(&alice.id, &profile("github", "2", None, false), &tokens("a"))
                .await,
            Err(IdentityError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_link_unknown_user() {
        let (linker, _, _) = linker(LinkPolicy::Explicit).await;
        assert!(matches!(
            linker
                .link_account("U_MISSING000", &profile("github", "1", None, false), &tokens("a"))
                .await,
            Err(IdentityError::UserNotFound)
        ));
    }

    #[tokio::test]
    async fn test_unlink_last_credential_refused() {
        let (linker, _, _) = linker(LinkPolicy::Explicit).await;
        let p = profile("github", "123", Some("octo@example.com"), true);
        let user = linker.resolve_or_create(&p, &tokens("a")).await.unwrap();

        assert!(matches!(
            linker.unlink_account(&user.id, "github").await,
            Err(IdentityError::LastCredential)
        ));
        assert_eq!(linker.list_accounts(&user.id).await.unwrap().len(), 1);

        // A second identity makes the first removable
        linker
            .link_account(&user.id, &profile("google", "g-1", None, false), &tokens("b"))
            .await
            .unwrap();
        linker.unlink_account(&user.id, "github").await.unwrap();

        assert!(matches!(
            linker.unlink_account(&user.id, "google").await,
            Err(IdentityError::LastCredential)
        ));
    }

    #[tokio::test]
    async fn test_unlink_with_password() {
        let (linker, users, _) = linker(LinkPolicy::Explicit).await;
        let alice = password_user(&users, "alice@example.com").await;
        linker
            .link_account(&alice.id, &profile("github", "1", None, false), &tokens("a"))
            .await
            .unwrap();

        let revocable = linker.unlink_account(&alice.id, "github").await.unwrap();
        assert_eq!(revocable.as_deref(), Some("a"));
        assert!(matches!(
            linker.unlink_account(&alice.id, "github").await,
            Err(IdentityError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_provider_tokens_sealed_at_rest() {
        let pool = test_pool().await;
        let users = UserDirectory::new(pool.clone());
        let cipher = Arc::new(TokenCipher::from_key(&TokenCipher::generate_key()).unwrap());
        let linker = IdentityLinker::new(pool.clone(), users, Some(cipher.clone()), LinkPolicy::Explicit);

        let p = profile("github", "123", Some("octo@example.com"), true);
        let user = linker.resolve_or_create(&p, &tokens("gho_secret")).await.unwrap();

        let (stored,): (String,) =
            sqlx::query_as("SELECT provider_access_token FROM external_identities WHERE user_id = ?")
                .bind(&user.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_ne!(stored, "gho_secret");
        assert_eq!(cipher.open(&stored).unwrap(), "gho_secret");

        // Unlinking hands back the opened token for revocation
        linker
            .link_account(&user.id, &profile("google", "g-1", None, false), &tokens("ya29"))
            .await
            .unwrap();
        let revocable = linker.unlink_account(&user.id, "github").await.unwrap();
        assert_eq!(revocable.as_deref(), Some("gho_secret"));
    }
}
