//! Single-use storage for pending authorizations

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::StateError;
use super::models::PendingAuthorization;

#[derive(Debug, Clone)]
pub struct StateStore {
    db: SqlitePool,
}

impl StateStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn put(&self, record: &PendingAuthorization) -> Result<(), StateError> {
        sqlx::query(
            r#"
            INSERT INTO pending_authorizations
                (state, provider, code_verifier, redirect_uri, link_user_id, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.state)
        .bind(&record.provider)
        .bind(&record.code_verifier)
        .bind(&record.redirect_uri)
        .bind(&record.link_user_id)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.db)
        .await?;

        debug!(provider = %record.provider, expires_at = record.expires_at, "Stored pending authorization");
        Ok(())
    }

    /// Atomically remove the record for `state` and hand it back if still valid.
    ///
    /// The delete and the read are one statement, so two concurrent callers
    /// can never both receive the same record. An expired record is removed
    /// as well and reported as `Expired`.
    pub async fn consume_if_valid(&self, state: &str) -> Result<PendingAuthorization, StateError> {
        let record = sqlx::query_as::<_, PendingAuthorization>(
            r#"
            DELETE FROM pending_authorizations
            WHERE state = ?
            RETURNING state, provider, code_verifier, redirect_uri, link_user_id, expires_at, created_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StateError::NotFound)?;

        if record.is_expired_at(Utc::now().timestamp()) {
            warn!(provider = %record.provider, "Rejected expired authorization state");
            return Err(StateError::Expired);
        }

        Ok(record)
    }

    /// Whether `state` belongs to a pending account-link flow. Reads only;
    /// the record is still consumed by [`consume_if_valid`](Self::consume_if_valid).
    pub async fn is_link_flow(&self, state: &str) -> Result<bool, StateError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM pending_authorizations WHERE state = ? AND link_user_id IS NOT NULL",
        )
        .bind(state)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.is_some())
    }

    /// Remove every expired record; returns how many were deleted
    pub async fn sweep_expired(&self) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM pending_authorizations WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }

    /// Periodically reclaim abandoned flows
    pub fn start_sweep_task(store: Arc<StateStore>, every: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match store.sweep_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!(removed = n, "Swept expired authorization states"),
                    Err(e) => warn!(error = %e, "Failed to sweep authorization states"),
                }
            }
        });
    }
}
