//! Credential Issuer
//!
//! Access tokens are HS256 JWTs. Refresh tokens are opaque random strings;
//! only their SHA-256 is stored. Each login starts a refresh *family* and
//! every rotation appends to it, which lets a replayed (already rotated)
//! token take the whole family down.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::CredentialError;
use super::models::{Claims, TokenPair};
use crate::common::generate_token_id;

const REFRESH_TOKEN_BYTES: usize = 32;

pub struct CredentialIssuer {
    db: SqlitePool,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl CredentialIssuer {
    pub fn new(db: SqlitePool, secret: &str, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            db,
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl,
            refresh_ttl,
        }
    }

    /// Mint a fresh pair, starting a new refresh family
    pub async fn issue_pair(&self, user_id: &str) -> Result<TokenPair, CredentialError> {
        let family_id = Uuid::new_v4().to_string();
        let mut conn = self.db.acquire().await?;
        let refresh_token = self.store_refresh_token(&mut conn, user_id, &family_id).await?;

        debug!(user_id = %user_id, "Issued session credentials");
        self.pair(user_id, refresh_token)
    }

    /// Check an access token and return the user id it was issued to
    pub fn verify_access(&self, token: &str) -> Result<String, CredentialError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => CredentialError::Expired,
            _ => CredentialError::Invalid,
        })?;

        // `exp` is inclusive in jsonwebtoken; make the boundary strict
        if data.claims.exp <= Utc::now().timestamp() {
            return Err(CredentialError::Expired);
        }

        Ok(data.claims.sub)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// The old token is claimed by a single conditional UPDATE inside the
    /// transaction that stores its successor, so at most one concurrent
    /// caller can ever rotate it.
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, CredentialError> {
        let token_hash = hash_refresh_token(refresh_token);
        let now = Utc::now().timestamp();

        let mut tx = self.db.begin().await?;

        let claimed: Option<(String, String)> = sqlx::query_as(
            r#"
            UPDATE refresh_tokens
            SET rotated_at = ?
            WHERE token_hash = ?
              AND rotated_at IS NULL
              AND revoked_at IS NULL
              AND expires_at > ?
            RETURNING user_id, family_id
            "#,
        )
        .bind(now)
        .bind(&token_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, family_id)) = claimed else {
            tx.rollback().await?;
            return Err(self.reject(&token_hash, now).await?);
        };

        let new_refresh = self.store_refresh_token(&mut tx, &user_id, &family_id).await?;
        tx.commit().await?;

        debug!(user_id = %user_id, "Rotated refresh token");
        self.pair(&user_id, new_refresh)
    }

    /// Revoke the family `refresh_token` belongs to (logout). Unknown tokens
    /// are ignored.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), CredentialError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = ?
            WHERE revoked_at IS NULL
              AND family_id = (SELECT family_id FROM refresh_tokens WHERE token_hash = ?)
            "#,
        )
        .bind(Utc::now().timestamp())
        .bind(hash_refresh_token(refresh_token))
        .execute(&self.db)
        .await?;

        debug!(revoked = result.rows_affected(), "Revoked refresh family");
        Ok(())
    }

    /// Work out why a refresh token could not be claimed
    async fn reject(&self, token_hash: &str, now: i64) -> Result<CredentialError, CredentialError> {
        let row: Option<(String, String, Option<i64>, Option<i64>, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, family_id, rotated_at, revoked_at, expires_at
            FROM refresh_tokens
            WHERE token_hash = ?
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;

        let Some((user_id, family_id, rotated_at, revoked_at, expires_at)) = row else {
            return Ok(CredentialError::Invalid);
        };

        if rotated_at.is_some() {
            let revoked = sqlx::query(
                "UPDATE refresh_tokens SET revoked_at = ? WHERE family_id = ? AND revoked_at IS NULL",
            )
            .bind(now)
            .bind(&family_id)
            .execute(&self.db)
            .await?;

            warn!(
                user_id = %user_id,
                family_id = %family_id,
                revoked = revoked.rows_affected(),
                "Refresh token reuse detected, family revoked"
            );
            return Ok(CredentialError::Reused);
        }

        if revoked_at.is_some() {
            info!(user_id = %user_id, "Rejected revoked refresh token");
            return Ok(CredentialError::Invalid);
        }

        if expires_at <= now {
            return Ok(CredentialError::Expired);
        }

        Ok(CredentialError::Invalid)
    }

    async fn store_refresh_token(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        family_id: &str,
    ) -> Result<String, CredentialError> {
        let token = generate_refresh_token();
        let expires_at = (Utc::now() + self.refresh_ttl).timestamp();

        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, family_id, token_hash, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(generate_token_id())
        .bind(user_id)
        .bind(family_id)
        .bind(hash_refresh_token(&token))
        .bind(expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(token)
    }

    fn pair(&self, user_id: &str, refresh_token: String) -> Result<TokenPair, CredentialError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let access_token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CredentialError::Signing(e.to_string()))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
            refresh_expires_in: self.refresh_ttl.num_seconds(),
        })
    }
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_refresh_token(token: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}
