//! Infrastructure layer: Postgres and Redis adapters, in-memory stand-ins,
//! and process configuration.

pub mod config;
pub mod db;
pub mod idempotency;
pub mod ratelimit;
pub mod users;
pub mod wallet_store;
