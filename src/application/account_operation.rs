use std::sync::Arc;

use tracing::{instrument, warn};

use crate::domain::{AccountId, BalanceEntry, Cents};

use super::{AppError, AuditGate, BalanceService};

/// Debits that must first be cleared by an external audit gate.
#[derive(Clone)]
pub struct AccountOperationService {
    gate: Arc<dyn AuditGate>,
    balances: BalanceService,
}

impl AccountOperationService {
    pub fn new(gate: Arc<dyn AuditGate>, balances: BalanceService) -> Self {
        Self { gate, balances }
    }

    /// Ask the audit gate, then debit.
    ///
    /// The gate is consulted before any unit of work is opened. If it fails for
    /// any reason the debit is not attempted and nothing is written.
    #[instrument(skip(self), err)]
    pub async fn debit_account(
        &self,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        if let Err(e) = self.gate.check().await {
            warn!(account_id, error = %e, "Debit aborted by audit gate");
            return Err(AppError::ExternalSystemUnavailable(format!(
                "External system call failed. Transaction aborted: {}",
                e
            )));
        }

        self.balances.debit(account_id, currency, amount_cents).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::{AuditGateError, ExchangeRateService};
    use crate::storage::Repository;

    struct CountingGate {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AuditGate for CountingGate {
        async fn check(&self) -> Result<(), AuditGateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(AuditGateError::Rejected(503))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_gate_failure_skips_debit() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gate.db");
        let repo = Repository::init(path.to_str().unwrap(), 1).await.unwrap();
        let balances = BalanceService::new(repo, ExchangeRateService::default());
        let account = balances.open_account().await.unwrap();
        balances.deposit(account.id, "EUR", 10000).await.unwrap();

        let gate = Arc::new(CountingGate {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let service = AccountOperationService::new(gate.clone(), balances.clone());

        let err = service
            .debit_account(account.id, "EUR", 5000)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalSystemUnavailable(_)));
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            balances.get_balance(account.id, "EUR").await.unwrap().amount_cents,
            10000
        );
    }
}
