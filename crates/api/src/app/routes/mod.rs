pub mod auth;
pub mod inquiry;
pub mod withdrawals;
