use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use walletd_core::{AmountMinor, UserId, WalletId};
use walletd_wallet::{LedgerEntry, Wallet, WalletError, WalletSnapshot, WalletStore};

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<UserId, Wallet>,
    ledger: Vec<LedgerEntry>,
}

/// Wallets and ledger behind one mutex; a debit and its ledger row are
/// applied under the same guard.
#[derive(Debug, Default)]
pub struct InMemoryWalletStore {
    state: Mutex<State>,
}

impl InMemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or replace) the wallet for `user_id`.
    pub fn open_wallet(
        &self,
        user_id: UserId,
        balance_minor: i64,
        currency: &str,
    ) -> Result<WalletSnapshot, WalletError> {
        let wallet = Wallet::open(WalletId::new(), user_id, balance_minor, currency, Utc::now())?;
        let snapshot = wallet.snapshot();
        self.lock("open_wallet")?.wallets.insert(user_id, wallet);
        Ok(snapshot)
    }

    /// Ledger rows of `user_id`'s wallet in insertion order.
    pub fn ledger_for(&self, user_id: UserId) -> Vec<LedgerEntry> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let Some(wallet_id) = state.wallets.get(&user_id).map(Wallet::id) else {
            return Vec::new();
        };
        state
            .ledger
            .iter()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect()
    }

    fn lock(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, State>, WalletError> {
        self.state
            .lock()
            .map_err(|_| WalletError::storage(operation, "wallet state lock poisoned"))
    }
}

#[async_trait]
impl WalletStore for InMemoryWalletStore {
    async fn withdraw(
        &self,
        user_id: UserId,
        amount: AmountMinor,
        chain_id: Option<&str>,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut state = self.lock("withdraw")?;
        let wallet = state.wallets.get_mut(&user_id).ok_or(WalletError::WalletNotFound)?;
        let entry = wallet.withdraw(amount, chain_id, Utc::now())?;
        let snapshot = wallet.snapshot();
        state.ledger.push(entry);
        Ok(snapshot)
    }

    async fn balance(&self, user_id: UserId) -> Result<WalletSnapshot, WalletError> {
        self.lock("balance")?
            .wallets
            .get(&user_id)
            .map(Wallet::snapshot)
            .ok_or(WalletError::WalletNotFound)
    }
}
