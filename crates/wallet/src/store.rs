use std::sync::Arc;

use async_trait::async_trait;

use walletd_core::{AmountMinor, UserId};

use crate::error::WalletError;
use crate::wallet::WalletSnapshot;

/// Persistence port for wallets and their ledger.
///
/// `withdraw` must be atomic: the balance update and the ledger insert both
/// commit or neither does. A debit never takes the balance below zero, even
/// under concurrent callers for the same wallet.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Debit `amount` and append a `withdrawal` ledger row tagged with `chain_id`.
    ///
    /// Errors: `WalletNotFound` when the user has no wallet, `InsufficientBalance`
    /// when the balance does not cover the amount, `Storage` otherwise.
    async fn withdraw(
        &self,
        user_id: UserId,
        amount: AmountMinor,
        chain_id: Option<&str>,
    ) -> Result<WalletSnapshot, WalletError>;

    /// Current wallet state for `user_id`.
    async fn balance(&self, user_id: UserId) -> Result<WalletSnapshot, WalletError>;
}

#[async_trait]
impl<S> WalletStore for Arc<S>
where
    S: WalletStore + ?Sized,
{
    async fn withdraw(
        &self,
        user_id: UserId,
        amount: AmountMinor,
        chain_id: Option<&str>,
    ) -> Result<WalletSnapshot, WalletError> {
        (**self).withdraw(user_id, amount, chain_id).await
    }

    async fn balance(&self, user_id: UserId) -> Result<WalletSnapshot, WalletError> {
        (**self).balance(user_id).await
    }
}
