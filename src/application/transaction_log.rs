use tracing::debug;

use crate::domain::{AccountId, Cents, TransactionLog, TransactionType};
use crate::storage::{Repository, UnitOfWork};

use super::AppError;

/// Appends audit-trail entries.
///
/// Entries can only be written through a caller's [`UnitOfWork`], so each one
/// commits or rolls back together with the balance change it documents.
#[derive(Clone)]
pub struct TransactionLogService {
    repo: Repository,
}

impl TransactionLogService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Record one monetary movement in the caller's unit of work.
    pub async fn log_transaction(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        kind: TransactionType,
        amount_cents: Cents,
        currency: &str,
    ) -> Result<TransactionLog, AppError> {
        let mut entry = TransactionLog::new(account_id, kind, amount_cents, currency);
        self.repo.append_log(uow, &mut entry).await?;

        debug!(
            account_id,
            kind = %entry.kind,
            amount_cents,
            currency,
            sequence = entry.sequence,
            reference_id = %entry.reference_id,
            "Appended transaction log entry"
        );

        Ok(entry)
    }

    /// An account's entries in append order, optionally only the most recent `limit`.
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionLog>, AppError> {
        Ok(self.repo.list_transactions(account_id, limit).await?)
    }
}
