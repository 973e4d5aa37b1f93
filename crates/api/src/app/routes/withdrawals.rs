use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, RequestId};
use crate::middleware::{
    rate_limit_middleware, withdraw_idempotency_middleware, IdempotencyState, RateLimitState,
};

/// `POST /withdrawals`: rate limited, then idempotent, then the debit itself.
pub fn router(services: &AppServices) -> Router {
    let idempotency = IdempotencyState {
        store: services.idempotency.clone(),
        lock_ttl: services.idempotency_lock_ttl,
    };
    let rate_limit = RateLimitState {
        limiter: services.withdraw_limiter.clone(),
        scope: "withdraw",
    };

    Router::new()
        .route("/withdrawals", post(create_withdrawal))
        .route_layer(from_fn_with_state(idempotency, withdraw_idempotency_middleware))
        .route_layer(from_fn_with_state(rate_limit, rate_limit_middleware))
}

pub async fn create_withdrawal(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
    request_id: Option<Extension<RequestId>>,
    body: Result<Json<dto::WithdrawRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return errors::invalid_body();
    };

    let chain_id = request_id.as_ref().map(|Extension(id)| id.as_str());
    match services
        .withdraw
        .withdraw(principal.user_id(), body.amount_minor, chain_id)
        .await
    {
        Ok(withdrawal) => Json(withdrawal).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}
