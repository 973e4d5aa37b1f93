//! `walletd-core` — shared domain primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod money;

pub use error::{BoxError, DomainError, DomainResult};
pub use id::{LedgerEntryId, UserId, WalletId};
pub use money::AmountMinor;
