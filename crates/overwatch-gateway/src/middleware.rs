use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use overwatch_security::{ApiKeys, Principal, RateLimiter};
use std::sync::Arc;
use tracing::warn;

/// Shared middleware state.
pub struct MiddlewareState {
    pub keys: ApiKeys,
    pub rate_limiter: RateLimiter,
}

/// Principal used for every request when no API keys are configured.
pub fn open_principal() -> Principal {
    Principal::admin("local")
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Resolves `Authorization: Bearer <key>` to a [`Principal`] stored in the
/// request extensions. With no keys configured every caller is let through.
pub async fn auth_middleware(
    State(state): State<Arc<MiddlewareState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Response {
    let principal = if state.keys.is_open() {
        open_principal()
    } else {
        match bearer(&headers) {
            Some(key) => match state.keys.authenticate(key) {
                Some(principal) => principal,
                None => {
                    warn!(path = %request.uri().path(), "Rejected request: invalid API key");
                    return ApiError::InvalidKey.into_response();
                }
            },
            None => {
                warn!(path = %request.uri().path(), "Rejected request: missing API key");
                return ApiError::MissingKey.into_response();
            }
        }
    };
    request.extensions_mut().insert(principal);
    next.run(request).await
}

/// Token bucket per principal.
pub async fn rate_limit_middleware(
    State(state): State<Arc<MiddlewareState>>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<Principal>()
        .map_or_else(|| "anonymous".to_string(), |p| p.name.clone());

    if !state.rate_limiter.check(&key) {
        warn!(principal = %key, "Rate limited request");
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).is_none());
        headers.insert("authorization", HeaderValue::from_static("Bearer k-123"));
        assert_eq!(bearer(&headers), Some("k-123"));
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(bearer(&headers).is_none());
    }
}
