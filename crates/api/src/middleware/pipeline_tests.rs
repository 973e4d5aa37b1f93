//! Rate limiting and idempotency stacked the way the withdrawal route uses
//! them, driven with failing stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::{from_fn, from_fn_with_state, Next},
    response::Response,
    routing::post,
    Router,
};
use serde_json::Value;
use tower::util::ServiceExt;

use walletd_infra::idempotency::{
    request_hash, withdraw_scope, Decision, IdempotencyError, IdempotencyRequest, IdempotencyStore,
    InMemoryIdempotencyStore, StoredResponse,
};
use walletd_infra::ratelimit::{
    Algorithm, InMemoryRateLimitStore, RateLimitConfig, RateLimitError, RateLimitResult, RateLimitStore,
    RateLimiter,
};

use super::{rate_limit_middleware, withdraw_idempotency_middleware, IdempotencyState, RateLimitState, IDEMPOTENCY_KEY_HEADER};
use crate::context::PrincipalContext;

const USER: &str = "user-1";
const BODY: &str = r#"{"amount_minor":100}"#;

/// Acquires like the in-memory store; every completion fails.
struct FailingComplete(InMemoryIdempotencyStore);

#[async_trait]
impl IdempotencyStore for FailingComplete {
    async fn acquire(&self, request: &IdempotencyRequest) -> Result<Decision, IdempotencyError> {
        self.0.acquire(request).await
    }

    async fn complete(&self, _: &IdempotencyRequest, _: &StoredResponse) -> Result<(), IdempotencyError> {
        Err(IdempotencyError::store("complete", "connection reset"))
    }
}

struct FailingAcquire;

#[async_trait]
impl IdempotencyStore for FailingAcquire {
    async fn acquire(&self, _: &IdempotencyRequest) -> Result<Decision, IdempotencyError> {
        Err(IdempotencyError::store("acquire", "connection reset"))
    }

    async fn complete(&self, _: &IdempotencyRequest, _: &StoredResponse) -> Result<(), IdempotencyError> {
        Ok(())
    }
}

struct FailingCounter;

#[async_trait]
impl RateLimitStore for FailingCounter {
    async fn allow(&self, _: &str, _: &RateLimitConfig) -> Result<RateLimitResult, RateLimitError> {
        Err(RateLimitError::store("allow", "connection refused"))
    }

    async fn reset(&self, _: &str) -> Result<(), RateLimitError> {
        Ok(())
    }
}

fn limiter(store: Arc<dyn RateLimitStore>, limit: u64) -> Arc<RateLimiter> {
    let config = RateLimitConfig::new(Algorithm::FixedWindow, limit, Duration::from_secs(60));
    Arc::new(RateLimiter::new(store, config).unwrap())
}

fn roomy_limiter() -> Arc<RateLimiter> {
    limiter(Arc::new(InMemoryRateLimitStore::new()), 100)
}

async fn as_user(mut req: Request, next: Next) -> Response {
    req.extensions_mut().insert(PrincipalContext::new(USER));
    next.run(req).await
}

fn pipeline(store: Arc<dyn IdempotencyStore>, limiter: Arc<RateLimiter>, status: StatusCode) -> Router {
    let idempotency = IdempotencyState {
        store,
        lock_ttl: Duration::from_secs(30),
    };
    let rate_limit = RateLimitState {
        limiter,
        scope: "withdraw",
    };

    Router::new()
        .route("/w", post(move || async move { (status, "handled") }))
        .route_layer(from_fn_with_state(idempotency, withdraw_idempotency_middleware))
        .route_layer(from_fn_with_state(rate_limit, rate_limit_middleware))
        .layer(from_fn(as_user))
}

fn withdraw(key: &str) -> Request {
    Request::builder()
        .method("POST")
        .uri("/w")
        .header(IDEMPOTENCY_KEY_HEADER, key)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(BODY))
        .unwrap()
}

async fn send(app: &Router, key: &str) -> (StatusCode, Value) {
    let response = app.clone().oneshot(withdraw(key)).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn unrecorded_success_becomes_internal_error() {
    let store = Arc::new(FailingComplete(InMemoryIdempotencyStore::new()));
    let app = pipeline(store, roomy_limiter(), StatusCode::CREATED);

    let (status, body) = send(&app, "k1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
    assert_eq!(body["message"], "failed to persist idempotency response");
}

#[tokio::test]
async fn unrecorded_server_error_is_passed_through() {
    let store = Arc::new(FailingComplete(InMemoryIdempotencyStore::new()));
    let app = pipeline(store, roomy_limiter(), StatusCode::BAD_GATEWAY);

    let response = app.clone().oneshot(withdraw("k1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"handled");
}

#[tokio::test]
async fn held_key_answers_request_in_progress() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let held = IdempotencyRequest::new(
        withdraw_scope(USER),
        "k1",
        request_hash("POST", "/w", USER, BODY.as_bytes()),
        Duration::from_secs(30),
    );
    assert_eq!(store.acquire(&held).await.unwrap(), Decision::Acquired);

    let app = pipeline(store, roomy_limiter(), StatusCode::CREATED);
    let (status, body) = send(&app, "k1").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "request_in_progress");
    assert_eq!(body["message"], "request is already in progress");
}

#[tokio::test]
async fn acquire_failure_is_internal_error() {
    let app = pipeline(Arc::new(FailingAcquire), roomy_limiter(), StatusCode::CREATED);

    let (status, body) = send(&app, "k1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "failed to acquire idempotency key");
}

#[tokio::test]
async fn counter_failure_is_internal_error_not_too_many_requests() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let app = pipeline(store.clone(), limiter(Arc::new(FailingCounter), 5), StatusCode::CREATED);

    let (status, body) = send(&app, "k1").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal_error");
    assert!(body.get("retry_after").is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn limited_request_leaves_no_idempotency_record() {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let app = pipeline(
        store.clone(),
        limiter(Arc::new(InMemoryRateLimitStore::new()), 1),
        StatusCode::CREATED,
    );

    let (status, _) = send(&app, "k1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(store.len(), 1);

    let (status, body) = send(&app, "k2").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate limit exceeded");
    assert!(body["retry_after"].as_u64().unwrap() >= 1);
    assert_eq!(store.len(), 1);
}
