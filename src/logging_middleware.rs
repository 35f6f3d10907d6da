// src/logging_middleware.rs
//! Middleware for logging request and response bodies in debug mode
//!
//! Credential-bearing JSON fields are replaced before anything is logged.

use axum::body::to_bytes;
use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::{debug, enabled, Level};

/// JSON keys whose values never reach the logs
const REDACTED_KEYS: &[&str] = &[
    "password",
    "access_token",
    "refresh_token",
    "code_verifier",
    "client_secret",
    "authorization_url",
];

/// Middleware to log request and response bodies in debug mode
pub async fn log_request_response(request: Request, next: Next) -> Result<Response, StatusCode> {
    if !enabled!(Level::DEBUG) {
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(logged) = loggable(&bytes) {
        debug!(
            method = %parts.method,
            path = %parts.uri.path(),
            request_body = %logged,
            "Request"
        );
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();

    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if let Some(logged) = loggable(&bytes) {
        debug!(status = %parts.status, response_body = %logged, "Response");
    }

    Ok(Response::from_parts(parts, Body::from(bytes)))
}

/// Redacted JSON text, or None for empty and non-JSON bodies
fn loggable(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    let mut json: Value = serde_json::from_slice(bytes).ok()?;
    redact(&mut json);
    Some(json.to_string())
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if REDACTED_KEYS.contains(&key.as_str()) {
                    *v = Value::String("[REDACTED]".to_string());
                } else {
                    redact(v);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
