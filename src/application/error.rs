use thiserror::Error;

use crate::domain::AccountId;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Account with id {0} not found")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds in account {account_id} for currency {currency}")]
    InsufficientFunds {
        account_id: AccountId,
        currency: String,
    },

    #[error("Invalid balance update for account {account_id}: {reason}")]
    IllegalBalanceUpdate {
        account_id: AccountId,
        reason: String,
    },

    #[error("Currency exchange rejected: {0}")]
    CurrencyExchange(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("External system unavailable: {0}")]
    ExternalSystemUnavailable(String),

    #[error("Concurrent modification detected: {0}")]
    ConcurrencyConflict(String),

    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

/// How a failure should be presented to whoever made the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself was invalid for the current state (4xx-style)
    ClientError,
    /// Lost an optimistic-concurrency race; the whole request may be retried
    Conflict,
    /// A required external system did not answer successfully (503-style)
    ServiceUnavailable,
    Internal,
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::AccountNotFound(_)
            | AppError::InsufficientFunds { .. }
            | AppError::IllegalBalanceUpdate { .. }
            | AppError::CurrencyExchange(_)
            | AppError::IllegalArgument(_) => ErrorCategory::ClientError,
            AppError::ConcurrencyConflict(_) => ErrorCategory::Conflict,
            AppError::ExternalSystemUnavailable(_) => ErrorCategory::ServiceUnavailable,
            AppError::Database(_) => ErrorCategory::Internal,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Other(e) => AppError::Database(e),
            conflict => AppError::ConcurrencyConflict(conflict.to_string()),
        }
    }
}
