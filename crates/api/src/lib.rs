//! HTTP API: server wiring, middleware pipeline and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
