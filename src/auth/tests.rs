//! Tests for auth module
//!
//! These tests verify session credential behaviour:
//! - access token issue/verify and expiry
//! - refresh rotation, reuse detection and family revocation
//! - the register/login/refresh/me endpoints

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::Duration;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use sqlx::SqlitePool;
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::common::test_support::{test_config, test_pool, TEST_JWT_SECRET};
    use crate::common::AppState;
    use crate::auth::error::{AccountError, CredentialError};
    use crate::auth::models::{Claims, NewUser, TokenPair};
    use crate::auth::tokens::CredentialIssuer;
    use crate::auth::users::UserDirectory;

    async fn user(pool: &SqlitePool, email: &str) -> String {
        UserDirectory::new(pool.clone())
            .create(&NewUser {
                email: email.to_string(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    fn issuer(pool: &SqlitePool) -> CredentialIssuer {
        CredentialIssuer::new(
            pool.clone(),
            TEST_JWT_SECRET,
            Duration::minutes(15),
            Duration::days(30),
        )
    }

    #[tokio::test]
    async fn test_issue_and_verify_round_trip() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = issuer(&pool);

        let pair = issuer.issue_pair(&user_id).await.unwrap();
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 15 * 60);
        assert_eq!(issuer.verify_access(&pair.access_token).unwrap(), user_id);
    }

    #[tokio::test]
    async fn test_expired_access_token() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = CredentialIssuer::new(
            pool.clone(),
            TEST_JWT_SECRET,
            Duration::seconds(-30),
            Duration::days(30),
        );

        let pair = issuer.issue_pair(&user_id).await.unwrap();
        assert!(matches!(
            issuer.verify_access(&pair.access_token),
            Err(CredentialError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_jwt_validation_fails_with_wrong_secret() {
        let pool = test_pool().await;
        let claims = Claims {
            sub: "U_SOMEONE000".to_string(),
            iat: 0,
            exp: 9999999999,
            jti: "j".to_string(),
        };
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"some-other-secret-some-other-secret"),
        )
        .expect("Failed to encode token");

        let issuer = issuer(&pool);
        assert!(matches!(issuer.verify_access(&forged), Err(CredentialError::Invalid)));
        assert!(matches!(issuer.verify_access("not.a.jwt"), Err(CredentialError::Invalid)));
    }

    #[tokio::test]
    async fn test_rotate_exactly_once() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = issuer(&pool);

        let first = issuer.issue_pair(&user_id).await.unwrap();
        let second = issuer.rotate(&first.refresh_token).await.unwrap();
        assert_ne!(first.refresh_token, second.refresh_token);
        assert_eq!(issuer.verify_access(&second.access_token).unwrap(), user_id);

        assert!(matches!(
            issuer.rotate(&first.refresh_token).await,
            Err(CredentialError::Reused)
        ));
    }

    #[tokio::test]
    async fn test_reuse_revokes_family() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = issuer(&pool);

        let first = issuer.issue_pair(&user_id).await.unwrap();
        let second = issuer.rotate(&first.refresh_token).await.unwrap();
        // Attacker replays the old token
        assert!(issuer.rotate(&first.refresh_token).await.is_err());

        // The legitimate successor is dead too
        assert!(matches!(
            issuer.rotate(&second.refresh_token).await,
            Err(CredentialError::Invalid)
        ));

        // Other logins are unaffected
        let other = issuer.issue_pair(&user_id).await.unwrap();
        assert!(issuer.rotate(&other.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_single_winner() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = Arc::new(issuer(&pool));
        let pair = issuer.issue_pair(&user_id).await.unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let issuer = issuer.clone();
                let token = pair.refresh_token.clone();
                tokio::spawn(async move { issuer.rotate(&token).await })
            })
            .collect();

        let mut wins = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(CredentialError::Reused) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_expired_refresh_token() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = CredentialIssuer::new(
            pool.clone(),
            TEST_JWT_SECRET,
            Duration::minutes(15),
            Duration::seconds(-1),
        );

        let pair = issuer.issue_pair(&user_id).await.unwrap();
        assert!(matches!(
            issuer.rotate(&pair.refresh_token).await,
            Err(CredentialError::Expired)
        ));
    }

    #[tokio::test]
    async fn test_unknown_refresh_token() {
        let pool = test_pool().await;
        assert!(matches!(
            issuer(&pool).rotate("never-issued").await,
            Err(CredentialError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_logout_revokes_and_is_idempotent() {
        let pool = test_pool().await;
        let user_id = user(&pool, "a@example.com").await;
        let issuer = issuer(&pool);

        let pair = issuer.issue_pair(&user_id).await.unwrap();
        issuer.revoke(&pair.refresh_token).await.unwrap();
        issuer.revoke(&pair.refresh_token).await.unwrap();
        issuer.revoke("never-issued").await.unwrap();

        assert!(matches!(
            issuer.rotate(&pair.refresh_token).await,
            Err(CredentialError::Invalid)
        ));
    }

    #[tokio::test]
    async fn test_email_lookup_is_case_insensitive() {
        let pool = test_pool().await;
        let users = UserDirectory::new(pool.clone());
        user(&pool, "Mixed@Example.com").await;

        let found = users.find_by_email("mixed@EXAMPLE.com").await.unwrap().unwrap();
        assert_eq!(found.email, "mixed@example.com");

        let dup = users
            .create(&NewUser {
                email: "MIXED@example.com".to_string(),
                ..Default::default()
            })
            .await;
        assert!(matches!(dup, Err(AccountError::EmailTaken)));
    }

    // ---- HTTP ----

    async fn app() -> axum::Router {
        let state = AppState::new(test_pool().await, test_config(&[])).unwrap();
        crate::build_router(Arc::new(state))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_register_login_refresh_me() {
        let app = app().await;
        let credentials = serde_json::json!({
            "email": "New@Example.com",
            "password": "correct horse battery",
            "name": "New User"
        });

        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/auth/register", credentials.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let again = app
            .clone()
            .oneshot(json_request("POST", "/api/auth/register", credentials))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(again).await["code"], "EMAIL_TAKEN");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                serde_json::json!({ "email": "new@example.com", "password": "correct horse battery" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pair: TokenPair = serde_json::from_value(body_json(response).await).unwrap();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/refresh",
                serde_json::json!({ "refresh_token": pair.refresh_token }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let rotated: TokenPair = serde_json::from_value(body_json(response).await).unwrap();

        let replay = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/refresh",
                serde_json::json!({ "refresh_token": pair.refresh_token }),
            ))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(replay).await["code"], "REFRESH_TOKEN_REUSED");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::AUTHORIZATION, format!("Bearer {}", rotated.access_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let me = body_json(response).await;
        assert_eq!(me["user"]["email"], "new@example.com");
        assert_eq!(me["has_password"], true);
        assert!(me["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_and_short_password() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/auth/register",
                serde_json::json!({ "email": "a@example.com", "password": "short" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/auth/login",
                serde_json::json!({ "email": "nobody@example.com", "password": "whatever123" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn test_me_requires_bearer() {
        let app = app().await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["code"], "UNAUTHORIZED");

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["code"], "TOKEN_INVALID");
    }
}
