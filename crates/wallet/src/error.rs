use thiserror::Error;

use walletd_core::{BoxError, DomainError};

/// Failure taxonomy shared by the wallet use-cases and their stores.
///
/// The first three variants are deterministic business outcomes; `Storage`
/// wraps whatever the backing store raised together with the step that failed.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("wallet not found")]
    WalletNotFound,

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("{operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl WalletError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn storage(
        operation: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Storage {
            operation,
            source: source.into(),
        }
    }
}

impl From<DomainError> for WalletError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::InvalidInput(msg),
        }
    }
}
