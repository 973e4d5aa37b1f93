use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use walletd_core::{LedgerEntryId, WalletId};

/// Kind of balance movement recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Withdrawal,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Withdrawal => "withdrawal",
        }
    }
}

impl core::fmt::Display for EntryType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable ledger row.
///
/// `amount_minor` is signed: debits are negative. `balance_after_minor` is the
/// wallet balance immediately after this entry was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub wallet_id: WalletId,
    pub entry_type: EntryType,
    pub amount_minor: i64,
    pub balance_after_minor: i64,
    pub reference_id: Option<String>,
    pub chain_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
