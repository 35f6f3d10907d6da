//! Shared fixtures for unit tests

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

use super::config::AuthConfig;
use super::migrations::run_migrations;

pub const TEST_JWT_SECRET: &str = "test-secret-that-is-at-least-32-bytes-long";

/// Fresh in-memory database with the schema applied.
///
/// A single connection that is never recycled, so the database lives as
/// long as the pool.
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    run_migrations(&pool, false).await.unwrap();
    pool
}

/// Configuration for tests, with `overrides` layered over the defaults
pub fn test_config(overrides: &[(&str, &str)]) -> AuthConfig {
    let mut pairs: Vec<(String, String)> = vec![
        ("JWT_SECRET".to_string(), TEST_JWT_SECRET.to_string()),
        ("PUBLIC_BASE_URL".to_string(), "http://auth.test".to_string()),
        ("FRONTEND_URL".to_string(), "http://app.test".to_string()),
    ];
    for (key, value) in overrides {
        pairs.retain(|(k, _)| k != key);
        pairs.push((key.to_string(), value.to_string()));
    }

    AuthConfig::from_lookup(move |key| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    })
    .unwrap()
}
