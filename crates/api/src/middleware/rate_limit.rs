use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use walletd_infra::ratelimit::{ip_key, user_key, RateLimitResult, RateLimiter};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    /// Key namespace, e.g. `withdraw`.
    pub scope: &'static str,
}

/// Per-principal rate limiting; falls back to the client address when the
/// request carries no principal.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let key = match req.extensions().get::<PrincipalContext>() {
        Some(principal) => user_key(state.scope, principal.user_id()),
        None => ip_key(state.scope, &client_addr(connect_info, req.headers())),
    };

    let result = match state.limiter.allow(&key).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, key = %key, "rate limit check failed");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal server error",
            );
        }
    };

    if !result.allowed {
        let retry_after = result.retry_after_secs();
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "rate limit exceeded",
                "retry_after": retry_after,
            })),
        )
            .into_response();
        let headers = response.headers_mut();
        set_limit_headers(headers, &result);
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(req).await;
    set_limit_headers(response.headers_mut(), &result);
    response
}

fn set_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(result.reset_at.timestamp().max(0)),
    );
}

fn client_addr(connect_info: Option<ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    connect_info
        .map(|ci| ci.0.ip().to_string())
        .or_else(|| {
            headers
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    #[test]
    fn client_addr_prefers_socket_then_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));

        let socket = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 4000);
        assert_eq!(client_addr(Some(ConnectInfo(socket)), &headers), "192.0.2.1");
        assert_eq!(client_addr(None, &headers), "203.0.113.7");
        assert_eq!(client_addr(None, &HeaderMap::new()), "unknown");
    }
}
