//! Idempotent execution of mutating requests.
//!
//! The request is fingerprinted (method, original path, principal, raw body)
//! and claimed in the [`IdempotencyStore`] under the caller's key. Only the
//! caller that acquires the key reaches the handler; its response is captured
//! and stored so retries with the same key replay it byte for byte.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{OriginalUri, Request, State},
    http::{header::CONTENT_TYPE, response::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};

use walletd_infra::idempotency::{
    request_hash, withdraw_scope, Decision, IdempotencyRequest, IdempotencyStore, StoredResponse,
};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// Request bodies above this size are rejected before hashing.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct IdempotencyState {
    pub store: Arc<dyn IdempotencyStore>,
    pub lock_ttl: Duration,
}

pub async fn withdraw_idempotency_middleware(
    State(state): State<IdempotencyState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(principal) = req.extensions().get::<PrincipalContext>().cloned() else {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "missing authenticated user",
        );
    };

    let key = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if key.is_empty() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_idempotency_key",
            "missing idempotency key",
        );
    }

    // Nested routers strip their prefix from `req.uri()`; hash the path the client sent.
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "request body rejected");
            return json_error(StatusCode::BAD_REQUEST, "invalid_body", "invalid request body");
        }
    };

    let request = IdempotencyRequest::new(
        withdraw_scope(principal.user_id()),
        key,
        request_hash(method.as_str(), &path, principal.user_id(), &body),
        state.lock_ttl,
    );

    match state.store.acquire(&request).await {
        Ok(Decision::Acquired) => {}
        Ok(Decision::Replay(stored)) => return replay(stored),
        Ok(Decision::InProgress) => {
            return json_error(
                StatusCode::CONFLICT,
                "request_in_progress",
                "request is already in progress",
            );
        }
        Ok(Decision::Conflict) => {
            return json_error(
                StatusCode::CONFLICT,
                "idempotency_conflict",
                "idempotency key reused with different payload",
            );
        }
        Err(e) => {
            tracing::error!(error = %e, scope = %request.scope, "failed to acquire idempotency key");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to acquire idempotency key",
            );
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(body))).await;

    let (parts, body) = response.into_parts();
    let body = match to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, scope = %request.scope, "failed to capture response body");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to persist idempotency response",
            );
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let stored = StoredResponse::new(parts.status.as_u16(), body.to_vec(), content_type);

    if let Err(e) = state.store.complete(&request, &stored).await {
        tracing::error!(
            error = %e,
            scope = %request.scope,
            status = parts.status.as_u16(),
            "failed to store idempotency response"
        );
        // A failed handler already tells the client to retry; keep its answer.
        if !parts.status.is_server_error() {
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to persist idempotency response",
            );
        }
    }

    rebuild(parts, body)
}

fn rebuild(parts: Parts, body: Bytes) -> Response {
    Response::from_parts(parts, Body::from(body))
}

fn replay(stored: StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.replay_status()).unwrap_or(StatusCode::OK);
    let content_type = stored
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok());

    let mut response = Response::new(Body::from(stored.body));
    *response.status_mut() = status;
    if let Some(content_type) = content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}
