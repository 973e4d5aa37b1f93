use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/login", post(login))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return errors::invalid_body();
    };

    match services.login.login(&body.email, &body.password).await {
        Ok(token) => Json(token).into_response(),
        Err(e) => errors::login_error_to_response(e),
    }
}
