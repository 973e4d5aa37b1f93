//! Postgres-backed wallet store.
//!
//! A withdrawal is one transaction:
//!
//! 1. conditional debit (`UPDATE ... WHERE balance_minor >= amount RETURNING ...`)
//! 2. on no row, an existence check to tell "no wallet" from "not enough money"
//! 3. ledger insert
//! 4. commit
//!
//! The conditional update takes the row lock, so concurrent debits on one
//! wallet are serialised and the balance cannot go negative. Dropping the
//! returned future before commit rolls the transaction back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};
use uuid::Uuid;

use walletd_core::{AmountMinor, LedgerEntryId, UserId, WalletId};
use walletd_wallet::{EntryType, WalletError, WalletSnapshot, WalletStore};

#[derive(Debug, Clone)]
pub struct PostgresWalletStore {
    pool: Arc<PgPool>,
}

impl PostgresWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl WalletStore for PostgresWalletStore {
    #[instrument(
        skip(self),
        fields(user_id = %user_id, amount_minor = amount.get(), balance_after = tracing::field::Empty),
        err
    )]
    async fn withdraw(
        &self,
        user_id: UserId,
        amount: AmountMinor,
        chain_id: Option<&str>,
    ) -> Result<WalletSnapshot, WalletError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WalletError::storage("failed to start transaction", e))?;

        let row = sqlx::query(
            r#"
            UPDATE wallets
            SET
                balance_minor = balance_minor - $1,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $2 AND balance_minor >= $1
            RETURNING id, user_id, balance_minor, currency, updated_at
            "#,
        )
        .bind(amount.get())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| WalletError::storage("failed to withdraw wallet balance", e))?;

        let Some(row) = row else {
            let exists = wallet_exists(&mut tx, user_id).await?;
            tx.rollback()
                .await
                .map_err(|e| WalletError::storage("failed to rollback transaction", e))?;
            return Err(if exists {
                WalletError::InsufficientBalance
            } else {
                WalletError::WalletNotFound
            });
        };

        let snapshot = WalletRow::try_from_row(&row)?.into_snapshot();

        sqlx::query(
            r#"
            INSERT INTO wallet_ledger (
                id,
                wallet_id,
                entry_type,
                amount_minor,
                balance_after_minor,
                reference_id,
                chain_id,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, NULL, $6, NOW())
            "#,
        )
        .bind(LedgerEntryId::new().as_uuid())
        .bind(snapshot.wallet_id.as_uuid())
        .bind(EntryType::Withdrawal.as_str())
        .bind(-amount.get())
        .bind(snapshot.balance_minor)
        .bind(chain_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| WalletError::storage("failed to insert wallet ledger", e))?;

        tx.commit()
            .await
            .map_err(|e| WalletError::storage("failed to commit transaction", e))?;

        Span::current().record("balance_after", snapshot.balance_minor);
        Ok(snapshot)
    }

    #[instrument(skip(self), fields(user_id = %user_id), err)]
    async fn balance(&self, user_id: UserId) -> Result<WalletSnapshot, WalletError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, balance_minor, currency, updated_at
            FROM wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| WalletError::storage("failed to get wallet balance", e))?;

        match row {
            Some(row) => Ok(WalletRow::try_from_row(&row)?.into_snapshot()),
            None => Err(WalletError::WalletNotFound),
        }
    }
}

async fn wallet_exists(tx: &mut Transaction<'_, Postgres>, user_id: UserId) -> Result<bool, WalletError> {
    sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM wallets WHERE user_id = $1)")
        .bind(user_id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| WalletError::storage("failed to check wallet existence", e))
}

#[derive(Debug)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance_minor: i64,
    currency: String,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn try_from_row(row: &sqlx::postgres::PgRow) -> Result<Self, WalletError> {
        let decode = |e: sqlx::Error| WalletError::storage("failed to decode wallet row", e);
        Ok(Self {
            id: row.try_get("id").map_err(decode)?,
            user_id: row.try_get("user_id").map_err(decode)?,
            balance_minor: row.try_get("balance_minor").map_err(decode)?,
            currency: row.try_get("currency").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }

    fn into_snapshot(self) -> WalletSnapshot {
        WalletSnapshot {
            wallet_id: WalletId::from_uuid(self.id),
            user_id: UserId::from_uuid(self.user_id),
            balance_minor: self.balance_minor,
            currency: self.currency,
            updated_at: self.updated_at,
        }
    }
}
