//! Shared-credential check for the API routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::errors::ApiError;

/// Header carrying the key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Query parameter carrying the key, for callers that cannot set headers.
pub const API_KEY_QUERY: &str = "code";

/// Authentication configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// `None` disables the check.
    pub api_key: Option<Arc<str>>,
}

impl AuthConfig {
    pub fn new(api_key: Option<&str>) -> Self {
        Self { api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from) }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Rejects requests that do not present the configured key.
pub async fn require_api_key(
    State(config): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(ref expected) = config.api_key else {
        return Ok(next.run(request).await);
    };

    let presented = presented_key(request.headers())
        .or_else(|| query_key(&request));

    match presented {
        Some(key) if keys_match(&key, expected) => {
            debug!("Request authenticated");
            Ok(next.run(request).await)
        }
        Some(_) => {
            warn!(path = %request.uri().path(), "Rejected request with wrong API key");
            Err(ApiError::unauthorized())
        }
        None => {
            debug!(path = %request.uri().path(), "Rejected request without API key");
            Err(ApiError::unauthorized())
        }
    }
}

fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn query_key(request: &Request) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    params.get(API_KEY_QUERY).cloned()
}

fn keys_match(presented: &str, expected: &str) -> bool {
    bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}
