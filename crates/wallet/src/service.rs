//! Wallet use-cases: withdrawal and balance inquiry.
//!
//! Both take the authenticated principal as a raw string; turning it into a
//! `UserId` (and rejecting junk) happens here so transports stay thin.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use walletd_core::{AmountMinor, UserId};

use crate::error::WalletError;
use crate::store::WalletStore;

/// Result of a successful withdrawal, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub user_id: String,
    pub amount_minor: i64,
    pub balance_minor: i64,
    pub currency: String,
    pub chain_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Current balance, as returned to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: String,
    pub balance_minor: i64,
    pub currency: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct WithdrawService {
    store: Arc<dyn WalletStore>,
}

impl WithdrawService {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(principal = %principal), err)]
    pub async fn withdraw(
        &self,
        principal: &str,
        amount_minor: i64,
        chain_id: Option<&str>,
    ) -> Result<Withdrawal, WalletError> {
        let principal = principal.trim();
        if principal.is_empty() {
            return Err(WalletError::WalletNotFound);
        }
        let amount = AmountMinor::new(amount_minor)?;
        let user_id = parse_user_id(principal)?;
        let chain_id = chain_id.map(str::trim).filter(|c| !c.is_empty());

        let snapshot = self.store.withdraw(user_id, amount, chain_id).await?;

        Ok(Withdrawal {
            user_id: snapshot.user_id.to_string(),
            amount_minor: amount.get(),
            balance_minor: snapshot.balance_minor,
            currency: snapshot.currency,
            chain_id: chain_id.map(str::to_string),
            updated_at: snapshot.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct BalanceInquiryService {
    store: Arc<dyn WalletStore>,
}

impl BalanceInquiryService {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(principal = %principal), err)]
    pub async fn balance(&self, principal: &str) -> Result<Balance, WalletError> {
        let principal = principal.trim();
        if principal.is_empty() {
            return Err(WalletError::WalletNotFound);
        }
        let user_id = parse_user_id(principal)?;
        let snapshot = self.store.balance(user_id).await?;

        Ok(Balance {
            user_id: snapshot.user_id.to_string(),
            balance_minor: snapshot.balance_minor,
            currency: snapshot.currency,
            updated_at: snapshot.updated_at,
        })
    }
}

fn parse_user_id(principal: &str) -> Result<UserId, WalletError> {
    principal
        .parse::<UserId>()
        .map_err(|_| WalletError::invalid_input("invalid user_id"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use walletd_core::WalletId;

    use super::*;
    use crate::wallet::{Wallet, WalletSnapshot};

    /// Single-wallet store for exercising the use-case rules.
    struct OneWallet {
        wallet: Mutex<Wallet>,
        calls: Mutex<usize>,
    }

    impl OneWallet {
        fn new(balance: i64) -> (Arc<Self>, UserId) {
            let user_id = UserId::new();
            let wallet = Wallet::open(WalletId::new(), user_id, balance, "IDR", Utc::now()).unwrap();
            let store = Arc::new(Self {
                wallet: Mutex::new(wallet),
                calls: Mutex::new(0),
            });
            (store, user_id)
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl WalletStore for OneWallet {
        async fn withdraw(
            &self,
            user_id: UserId,
            amount: AmountMinor,
            chain_id: Option<&str>,
        ) -> Result<WalletSnapshot, WalletError> {
            *self.calls.lock().unwrap() += 1;
            let mut wallet = self.wallet.lock().unwrap();
            if wallet.user_id() != user_id {
                return Err(WalletError::WalletNotFound);
            }
            wallet.withdraw(amount, chain_id, Utc::now())?;
            Ok(wallet.snapshot())
        }

        async fn balance(&self, user_id: UserId) -> Result<WalletSnapshot, WalletError> {
            *self.calls.lock().unwrap() += 1;
            let wallet = self.wallet.lock().unwrap();
            if wallet.user_id() != user_id {
                return Err(WalletError::WalletNotFound);
            }
            Ok(wallet.snapshot())
        }
    }

    #[tokio::test]
    async fn withdraw_builds_response_from_snapshot() {
        let (store, user_id) = OneWallet::new(10_000);
        let svc = WithdrawService::new(store.clone());

        let out = svc
            .withdraw(&user_id.to_string(), 2_500, Some(" chain-1 "))
            .await
            .unwrap();

        assert_eq!(out.user_id, user_id.to_string());
        assert_eq!(out.amount_minor, 2_500);
        assert_eq!(out.balance_minor, 7_500);
        assert_eq!(out.currency, "IDR");
        assert_eq!(out.chain_id.as_deref(), Some("chain-1"));
    }

    #[tokio::test]
    async fn empty_principal_is_wallet_not_found_without_touching_store() {
        let (store, _) = OneWallet::new(100);
        let svc = WithdrawService::new(store.clone());

        let err = svc.withdraw("   ", 10, None).await.unwrap_err();

        assert!(matches!(err, WalletError::WalletNotFound));
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn non_positive_amount_is_invalid_input_without_touching_store() {
        let (store, user_id) = OneWallet::new(100);
        let svc = WithdrawService::new(store.clone());

        for amount in [0, -5] {
            let err = svc.withdraw(&user_id.to_string(), amount, None).await.unwrap_err();
            assert!(matches!(err, WalletError::InvalidInput(_)));
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_principal_is_invalid_input() {
        let (store, _) = OneWallet::new(100);
        let svc = WithdrawService::new(store);

        let err = svc.withdraw("user-42", 10, None).await.unwrap_err();
        assert!(matches!(err, WalletError::InvalidInput(msg) if msg == "invalid user_id"));
    }

    #[tokio::test]
    async fn store_outcomes_pass_through() {
        let (store, user_id) = OneWallet::new(100);
        let svc = WithdrawService::new(store);

        let err = svc.withdraw(&user_id.to_string(), 101, None).await.unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance));

        let err = svc.withdraw(&UserId::new().to_string(), 1, None).await.unwrap_err();
        assert!(matches!(err, WalletError::WalletNotFound));
    }

    #[tokio::test]
    async fn balance_inquiry_reads_snapshot() {
        let (store, user_id) = OneWallet::new(4_200);
        let svc = BalanceInquiryService::new(store);

        let balance = svc.balance(&user_id.to_string()).await.unwrap();
        assert_eq!(balance.balance_minor, 4_200);
        assert_eq!(balance.currency, "IDR");

        let err = svc.balance(&UserId::new().to_string()).await.unwrap_err();
        assert!(matches!(err, WalletError::WalletNotFound));
    }
}
