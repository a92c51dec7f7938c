// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use fxledger::application::{
    AuditGate, AuditGateError, BalanceService, ExchangeRateService, RateTable,
};
use fxledger::domain::{AccountId, Cents};
use fxledger::storage::Repository;
use tempfile::TempDir;

/// Helper to create a ledger backed by a temporary database
pub async fn test_ledger() -> Result<(BalanceService, TempDir)> {
    test_ledger_with(4).await
}

/// Same as [`test_ledger`] with an explicit pool size
pub async fn test_ledger_with(max_connections: u32) -> Result<(BalanceService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let repo = Repository::init(db_path.to_str().unwrap(), max_connections).await?;
    let service = BalanceService::new(repo, ExchangeRateService::new(RateTable::seed()));
    Ok((service, temp_dir))
}

/// Repository handle on the same database file as a ledger from [`test_ledger`]
pub async fn open_repository(temp_dir: &TempDir) -> Result<Repository> {
    let db_path = temp_dir.path().join("test.db");
    Repository::connect(db_path.to_str().unwrap(), 2).await
}

/// Open an account and fund it with one deposit
pub async fn funded_account(
    service: &BalanceService,
    currency: &str,
    amount_cents: Cents,
) -> Result<AccountId> {
    let account = service.open_account().await?;
    service.deposit(account.id, currency, amount_cents).await?;
    Ok(account.id)
}

/// Audit gate that answers from a fixed outcome and counts calls
pub struct StubGate {
    pub calls: AtomicUsize,
    outcome: Option<u16>,
}

impl StubGate {
    pub fn accepting() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: None,
        }
    }

    /// Fails every check as if the gate answered with `status`
    pub fn rejecting(status: u16) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcome: Some(status),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditGate for StubGate {
    async fn check(&self) -> Result<(), AuditGateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            None => Ok(()),
            Some(status) => Err(AuditGateError::Rejected(status)),
        }
    }
}
