//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend selection and use-case services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{middleware::from_fn, middleware::from_fn_with_state, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub const API_PREFIX: &str = "/api/v1";

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
///
/// Route groups are mounted according to `services.modules`; token
/// verification guards every protected group regardless.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    let auth_state = middleware::AuthState {
        tokens: services.tokens.clone(),
    };

    let mut public = Router::new();
    let mut protected = Router::new();

    if services.modules.serves_inquiry() {
        public = public.nest("/auth", routes::auth::router());
        protected = protected.nest("/inquiries", routes::inquiry::router());
    }
    if services.modules.serves_withdraw() {
        protected = protected.merge(routes::withdrawals::router(&services));
    }

    let protected =
        protected.route_layer(from_fn_with_state(auth_state, middleware::auth_middleware));

    Router::new()
        .nest(API_PREFIX, public.merge(protected))
        .layer(
            ServiceBuilder::new()
                .layer(from_fn(middleware::request_id_middleware))
                .layer(Extension(services)),
        )
}
