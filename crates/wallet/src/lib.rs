//! `walletd-wallet` — wallet balances, the withdrawal ledger, and the
//! use-cases built on them.
//!
//! Storage is reached only through the [`WalletStore`] port; implementations
//! live in `walletd-infra`.

pub mod error;
pub mod ledger;
pub mod service;
pub mod store;
pub mod wallet;

pub use error::WalletError;
pub use ledger::{EntryType, LedgerEntry};
pub use service::{Balance, BalanceInquiryService, WithdrawService, Withdrawal};
pub use store::WalletStore;
pub use wallet::{Wallet, WalletSnapshot};
