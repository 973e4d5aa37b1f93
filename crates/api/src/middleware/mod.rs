//! Request pipeline middleware.
//!
//! Order on the withdrawal route, outermost first: request id, authentication,
//! rate limiting, idempotency, handler.

pub mod auth;
pub mod idempotency;
pub mod rate_limit;
pub mod request_id;

pub use auth::{auth_middleware, AuthState};
pub use idempotency::{withdraw_idempotency_middleware, IdempotencyState, IDEMPOTENCY_KEY_HEADER};
pub use rate_limit::{rate_limit_middleware, RateLimitState};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};

#[cfg(test)]
mod pipeline_tests;
