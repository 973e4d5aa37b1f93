use std::sync::Arc;

use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::PrincipalContext;

pub fn router() -> Router {
    Router::new().route("/balance", get(get_balance))
}

pub async fn get_balance(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    match services.inquiry.balance(principal.user_id()).await {
        Ok(balance) => Json(balance).into_response(),
        Err(e) => errors::wallet_error_to_response(e),
    }
}
