use std::collections::BTreeMap;
use std::str::FromStr;

use tracing::{info, instrument, warn};

use crate::domain::{
    Account, AccountId, Balance, BalanceEntry, BalanceUpdateError, Cents, CurrencyCode,
    TransactionLog, TransactionType, is_iso_currency,
};
use crate::storage::{Repository, UnitOfWork};

use super::{AppError, ExchangeRateService, TransactionLogService};

/// The ledger core: deposits, debits, balance queries and currency exchange.
///
/// Every mutating operation runs in its own [`UnitOfWork`]. Balances are written
/// back conditioned on the version that was read, so a concurrent writer makes
/// the whole operation fail with [`AppError::ConcurrencyConflict`] instead of
/// being retried.
#[derive(Clone)]
pub struct BalanceService {
    repo: Repository,
    rates: ExchangeRateService,
    log: TransactionLogService,
}

/// All balances of one account, keyed by currency.
#[derive(Debug, Clone)]
pub struct AccountStatement {
    pub account: Account,
    balances: BTreeMap<String, Cents>,
}

impl AccountStatement {
    pub fn balances(&self) -> &BTreeMap<String, Cents> {
        &self.balances
    }

    /// The balance in `currency`, zero if the account holds none.
    pub fn balance(&self, currency: &str) -> BalanceEntry {
        self.balances
            .get(currency)
            .map(|&amount_cents| BalanceEntry {
                currency: currency.to_string(),
                amount_cents,
            })
            .unwrap_or_else(|| BalanceEntry::zero(currency))
    }

    pub fn entries(&self) -> impl Iterator<Item = BalanceEntry> + '_ {
        self.balances.iter().map(|(currency, &amount_cents)| BalanceEntry {
            currency: currency.clone(),
            amount_cents,
        })
    }
}

impl BalanceService {
    pub fn new(repo: Repository, rates: ExchangeRateService) -> Self {
        let log = TransactionLogService::new(repo.clone());
        Self { repo, rates, log }
    }

    pub fn rates(&self) -> &ExchangeRateService {
        &self.rates
    }

    // ========================
    // Account operations
    // ========================

    pub async fn open_account(&self) -> Result<Account, AppError> {
        let account = self.repo.create_account().await?;
        info!(account_id = account.id, "Opened account");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(account_id)
            .await?
            .ok_or(AppError::AccountNotFound(account_id))
    }

    pub async fn account_statement(&self, account_id: AccountId) -> Result<AccountStatement, AppError> {
        let account = self.get_account(account_id).await?;
        let balances = self
            .repo
            .list_balances(account_id)
            .await?
            .into_iter()
            .map(|balance| (balance.currency, balance.amount_cents))
            .collect();

        Ok(AccountStatement { account, balances })
    }

    /// Log entries of an account in append order.
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionLog>, AppError> {
        self.get_account(account_id).await?;
        self.log.history(account_id, limit).await
    }

    // ========================
    // Balance operations
    // ========================

    /// Add `amount_cents` to the account's balance in `currency`, creating the
    /// balance if this is the first deposit in that currency.
    #[instrument(skip(self), err)]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        let currency = parse_currency(currency)?;

        let mut uow = self.repo.begin().await?;
        let result = self
            .apply_deposit(&mut uow, account_id, currency.as_str(), amount_cents)
            .await;
        let entry = self.finish(uow, result).await?;

        info!(
            account_id,
            currency = %entry.currency,
            amount_cents,
            balance_cents = entry.amount_cents,
            "Deposit committed"
        );
        Ok(entry)
    }

    /// Remove `amount_cents` from the account's balance in `currency`.
    ///
    /// A debit never creates a balance. A zero amount is accepted and logged.
    #[instrument(skip(self), err)]
    pub async fn debit(
        &self,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        if amount_cents < 0 {
            return Err(AppError::IllegalArgument(
                "Debit amount must not be negative".to_string(),
            ));
        }
        let currency = parse_currency(currency)?;

        let mut uow = self.repo.begin().await?;
        let result = self
            .apply_debit(&mut uow, account_id, currency.as_str(), amount_cents)
            .await;
        let entry = self.finish(uow, result).await?;

        info!(
            account_id,
            currency = %entry.currency,
            amount_cents,
            balance_cents = entry.amount_cents,
            "Debit committed"
        );
        Ok(entry)
    }

    /// Current balance, or zero if the account holds nothing in `currency`.
    pub async fn get_balance(
        &self,
        account_id: AccountId,
        currency: &str,
    ) -> Result<BalanceEntry, AppError> {
        let currency = parse_currency(currency)?;
        Ok(self
            .repo
            .get_balance(account_id, currency.as_str())
            .await?
            .map(|balance| balance.entry())
            .unwrap_or_else(|| BalanceEntry::zero(currency.as_str())))
    }

    /// Move `amount_cents` of `from` into `to` at the configured rates.
    /// Returns the state of the target balance.
    #[instrument(skip(self), err)]
    pub async fn exchange(
        &self,
        account_id: AccountId,
        from: &str,
        to: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        if amount_cents <= 0 {
            return Err(AppError::CurrencyExchange(
                "Exchange amount must be positive".to_string(),
            ));
        }
        let from = exchange_currency(from)?;
        let to = exchange_currency(to)?;
        if from == to {
            return Err(AppError::CurrencyExchange(
                "Cannot exchange same currency".to_string(),
            ));
        }
        if !self.rates.is_supported(from.as_str()) || !self.rates.is_supported(to.as_str()) {
            return Err(AppError::CurrencyExchange(format!(
                "The currency pair {} / {} is not supported",
                from, to
            )));
        }

        let mut uow = self.repo.begin().await?;
        let result = self
            .apply_exchange(&mut uow, account_id, from.as_str(), to.as_str(), amount_cents)
            .await;
        let entry = self.finish(uow, result).await?;

        info!(
            account_id,
            from = %from,
            to = %to,
            amount_cents,
            target_balance_cents = entry.amount_cents,
            "Exchange committed"
        );
        Ok(entry)
    }

    // ========================
    // Unit-of-work bodies
    // ========================

    async fn apply_deposit(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        self.require_account(uow, account_id).await?;

        let balance = self
            .repo
            .find_balance(uow, account_id, currency)
            .await?
            .unwrap_or_else(|| Balance::open(account_id, currency));
        let saved = self.credit(uow, balance, amount_cents).await?;

        self.log
            .log_transaction(uow, account_id, TransactionType::Deposit, amount_cents, currency)
            .await?;
        Ok(saved.entry())
    }

    async fn apply_debit(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        self.require_account(uow, account_id).await?;

        let saved = self
            .withdraw(uow, account_id, currency, amount_cents)
            .await?;

        self.log
            .log_transaction(uow, account_id, TransactionType::Withdrawal, amount_cents, currency)
            .await?;
        Ok(saved.entry())
    }

    async fn apply_exchange(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        from: &str,
        to: &str,
        amount_cents: Cents,
    ) -> Result<BalanceEntry, AppError> {
        self.require_account(uow, account_id).await?;

        self.withdraw(uow, account_id, from, amount_cents).await?;

        let converted_cents = self.rates.convert(from, to, amount_cents)?;
        let target = self
            .repo
            .find_balance(uow, account_id, to)
            .await?
            .unwrap_or_else(|| Balance::open(account_id, to));
        let saved = self.credit(uow, target, converted_cents).await?;

        self.log
            .log_transaction(uow, account_id, TransactionType::ExchangeOut, amount_cents, from)
            .await?;
        self.log
            .log_transaction(uow, account_id, TransactionType::ExchangeIn, converted_cents, to)
            .await?;
        Ok(saved.entry())
    }

    async fn require_account(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        self.repo
            .find_account(uow, account_id)
            .await?
            .ok_or(AppError::AccountNotFound(account_id))
    }

    async fn credit(
        &self,
        uow: &mut UnitOfWork,
        mut balance: Balance,
        amount_cents: Cents,
    ) -> Result<Balance, AppError> {
        balance
            .deposit(amount_cents)
            .map_err(|e| update_error(&balance, e))?;
        Ok(self.repo.save_balance(uow, &balance).await?)
    }

    async fn withdraw(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        currency: &str,
        amount_cents: Cents,
    ) -> Result<Balance, AppError> {
        let mut balance = self
            .repo
            .find_balance(uow, account_id, currency)
            .await?
            .ok_or_else(|| AppError::InsufficientFunds {
                account_id,
                currency: currency.to_string(),
            })?;
        balance
            .debit(amount_cents)
            .map_err(|e| update_error(&balance, e))?;
        Ok(self.repo.save_balance(uow, &balance).await?)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(&self, uow: UnitOfWork, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => match uow.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    let err = AppError::from(e);
                    if matches!(err, AppError::ConcurrencyConflict(_)) {
                        warn!(error = %err, "Commit rejected by a concurrent writer");
                    }
                    Err(err)
                }
            },
            Err(err) => {
                if matches!(err, AppError::ConcurrencyConflict(_)) {
                    warn!(error = %err, "Balance changed concurrently, operation aborted");
                }
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Currency for deposit, debit and balance queries: three letters, any code.
fn parse_currency(currency: &str) -> Result<CurrencyCode, AppError> {
    CurrencyCode::from_str(currency).map_err(|e| AppError::IllegalArgument(e.to_string()))
}

/// Currency for exchange: must be a recognised ISO 4217 code, as written.
fn exchange_currency(currency: &str) -> Result<CurrencyCode, AppError> {
    Some(currency)
        .filter(|code| is_iso_currency(code))
        .and_then(|code| CurrencyCode::from_str(code).ok())
        .ok_or_else(|| AppError::CurrencyExchange(format!("Unsupported currency code: {}", currency)))
}

fn update_error(balance: &Balance, err: BalanceUpdateError) -> AppError {
    match err {
        BalanceUpdateError::InsufficientFunds { .. } => AppError::InsufficientFunds {
            account_id: balance.account_id,
            currency: balance.currency.clone(),
        },
        BalanceUpdateError::NegativeDebit { .. } => AppError::IllegalArgument(err.to_string()),
        BalanceUpdateError::NonPositiveDeposit { .. } | BalanceUpdateError::Overflow => {
            AppError::IllegalBalanceUpdate {
                account_id: balance.account_id,
                reason: err.to_string(),
            }
        }
    }
}
