use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use walletd_core::{AmountMinor, LedgerEntryId, UserId, WalletId};

use crate::error::WalletError;
use crate::ledger::{EntryType, LedgerEntry};

/// Read view of a wallet, as returned by stores after a read or a debit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub balance_minor: i64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

/// A user's wallet (one per user).
///
/// Invariant: `balance_minor >= 0` at all times. `version` increases by one on
/// every successful debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    id: WalletId,
    user_id: UserId,
    balance_minor: i64,
    currency: String,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(
        id: WalletId,
        user_id: UserId,
        balance_minor: i64,
        currency: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, WalletError> {
        if balance_minor < 0 {
            return Err(WalletError::invalid_input("opening balance must not be negative"));
        }
        let currency = currency.into();
        if currency.trim().is_empty() {
            return Err(WalletError::invalid_input("currency is required"));
        }

        Ok(Self {
            id,
            user_id,
            balance_minor,
            currency,
            version: 1,
            updated_at: now,
        })
    }

    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance_minor(&self) -> i64 {
        self.balance_minor
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Debit `amount` and return the ledger entry describing the movement.
    ///
    /// The wallet is left untouched when the balance does not cover the amount.
    pub fn withdraw(
        &mut self,
        amount: AmountMinor,
        chain_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, WalletError> {
        let amount = amount.get();
        if self.balance_minor < amount {
            return Err(WalletError::InsufficientBalance);
        }

        self.balance_minor -= amount;
        self.version += 1;
        self.updated_at = now;

        Ok(LedgerEntry {
            id: LedgerEntryId::new(),
            wallet_id: self.id,
            entry_type: EntryType::Withdrawal,
            amount_minor: -amount,
            balance_after_minor: self.balance_minor,
            reference_id: None,
            chain_id: chain_id.map(str::to_string),
            created_at: now,
        })
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            wallet_id: self.id,
            user_id: self.user_id,
            balance_minor: self.balance_minor,
            currency: self.currency.clone(),
            updated_at: self.updated_at,
        }
    }
}
