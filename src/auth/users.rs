//! User directory

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{error, info};

use super::error::AccountError;
use super::models::{NewUser, User};
use crate::common::{generate_user_id, safe_email_log};

const USER_COLUMNS: &str = "id, email, name, password_hash, avatar_url, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: SqlitePool,
}

impl UserDirectory {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.db)
            .await
    }

    /// Emails are stored lowercased, so lookups are case-insensitive
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(normalize_email(email))
            .fetch_optional(&self.db)
            .await
    }

    pub async fn create(&self, new_user: &NewUser) -> Result<User, AccountError> {
        let mut conn = self.db.acquire().await?;
        let id = Self::insert(&mut conn, new_user).await?;

        info!(user_id = %id, email = %safe_email_log(&new_user.email), "Created user");

        sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(&id)
            .fetch_one(&mut *conn)
            .await
            .map_err(AccountError::Database)
    }

    /// Insert on an existing connection so callers can run it inside their
    /// own transaction. Returns the new id.
    pub async fn insert(conn: &mut SqliteConnection, new_user: &NewUser) -> Result<String, AccountError> {
        let id = generate_user_id();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, name, password_hash, avatar_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, datetime('now'), datetime('now'))
            "#,
        )
        .bind(&id)
        .bind(normalize_email(&new_user.email))
        .bind(new_user.name.as_deref())
        .bind(new_user.password_hash.as_deref())
        .bind(new_user.avatar_url.as_deref())
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE constraint failed: users.email") {
                AccountError::EmailTaken
            } else {
                error!(error = %e, "Database error inserting user");
                AccountError::Database(e)
            }
        })?;

        Ok(id)
    }

    /// Fill in an avatar the user does not have yet
    pub async fn set_avatar_if_missing(&self, user_id: &str, avatar_url: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET avatar_url = ?, updated_at = datetime('now') WHERE id = ? AND avatar_url IS NULL",
        )
        .bind(avatar_url)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
