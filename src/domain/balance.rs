use std::fmt;

use serde::{Deserialize, Serialize};

use super::{AccountId, Cents};

/// The amount held by one account in one currency.
///
/// `version` is the optimistic-concurrency token: it is the value read from the
/// store, and a save only succeeds if the stored row still carries it. A balance
/// that has never been persisted has no `id` and version 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub id: Option<i64>,
    pub account_id: AccountId,
    pub currency: String,
    pub amount_cents: Cents,
    pub version: i64,
}

impl Balance {
    /// A new, unpersisted zero balance bound to an account.
    pub fn open(account_id: AccountId, currency: impl Into<String>) -> Self {
        Self {
            id: None,
            account_id,
            currency: currency.into(),
            amount_cents: 0,
            version: 0,
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Add a strictly positive amount.
    pub fn deposit(&mut self, amount_cents: Cents) -> Result<(), BalanceUpdateError> {
        if amount_cents <= 0 {
            return Err(BalanceUpdateError::NonPositiveDeposit {
                amount: amount_cents,
            });
        }
        self.amount_cents = self
            .amount_cents
            .checked_add(amount_cents)
            .ok_or(BalanceUpdateError::Overflow)?;
        Ok(())
    }

    /// Remove an amount, refusing to go below zero.
    ///
    /// A zero debit is accepted. Callers reject negative amounts before
    /// reaching the balance.
    pub fn debit(&mut self, amount_cents: Cents) -> Result<(), BalanceUpdateError> {
        if amount_cents < 0 {
            return Err(BalanceUpdateError::NegativeDebit {
                amount: amount_cents,
            });
        }
        if self.amount_cents < amount_cents {
            return Err(BalanceUpdateError::InsufficientFunds {
                available: self.amount_cents,
                requested: amount_cents,
            });
        }
        self.amount_cents -= amount_cents;
        Ok(())
    }

    pub fn entry(&self) -> BalanceEntry {
        BalanceEntry {
            currency: self.currency.clone(),
            amount_cents: self.amount_cents,
        }
    }
}

/// The caller-facing `{currency, amount}` view of a balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub currency: String,
    pub amount_cents: Cents,
}

impl BalanceEntry {
    pub fn zero(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            amount_cents: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceUpdateError {
    NonPositiveDeposit { amount: Cents },
    NegativeDebit { amount: Cents },
    InsufficientFunds { available: Cents, requested: Cents },
    Overflow,
}

impl fmt::Display for BalanceUpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceUpdateError::NonPositiveDeposit { amount } => {
                write!(f, "deposit of {} cents must be positive", amount)
            }
            BalanceUpdateError::NegativeDebit { amount } => {
                write!(f, "debit of {} cents must not be negative", amount)
            }
            BalanceUpdateError::InsufficientFunds {
                available,
                requested,
            } => write!(
                f,
                "cannot debit {} cents from a balance of {} cents",
                requested, available
            ),
            BalanceUpdateError::Overflow => write!(f, "balance amount overflow"),
        }
    }
}

impl std::error::Error for BalanceUpdateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_balance_is_new_and_empty() {
        let balance = Balance::open(7, "USD");
        assert!(balance.is_new());
        assert_eq!(balance.amount_cents, 0);
        assert_eq!(balance.version, 0);
        assert_eq!(balance.entry(), BalanceEntry::zero("USD"));
    }

    #[test]
    fn test_deposit_adds() {
        let mut balance = Balance::open(1, "EUR");
        balance.deposit(5000).unwrap();
        balance.deposit(2500).unwrap();
        assert_eq!(balance.amount_cents, 7500);
    }

    #[test]
    fn test_deposit_rejects_zero_and_negative() {
        let mut balance = Balance::open(1, "EUR");
        balance.deposit(1000).unwrap();

        for amount in [0, -1, -1000] {
            assert_eq!(
                balance.deposit(amount),
                Err(BalanceUpdateError::NonPositiveDeposit { amount })
            );
        }
        assert_eq!(balance.amount_cents, 1000);
    }

    #[test]
    fn test_debit_cannot_overdraw() {
        let mut balance = Balance::open(1, "EUR");
        balance.deposit(1000).unwrap();

        assert_eq!(
            balance.debit(1001),
            Err(BalanceUpdateError::InsufficientFunds {
                available: 1000,
                requested: 1001
            })
        );
        assert_eq!(balance.amount_cents, 1000);

        balance.debit(1000).unwrap();
        assert_eq!(balance.amount_cents, 0);
    }

    #[test]
    fn test_zero_debit_is_accepted_unlike_zero_deposit() {
        let mut balance = Balance::open(1, "EUR");
        balance.deposit(500).unwrap();

        assert!(balance.debit(0).is_ok());
        assert_eq!(balance.amount_cents, 500);
        assert!(balance.deposit(0).is_err());
    }

    #[test]
    fn test_negative_debit_rejected() {
        let mut balance = Balance::open(1, "EUR");
        assert_eq!(
            balance.debit(-5),
            Err(BalanceUpdateError::NegativeDebit { amount: -5 })
        );
    }

    #[test]
    fn test_deposit_overflow() {
        let mut balance = Balance::open(1, "EUR");
        balance.deposit(Cents::MAX).unwrap();
        assert_eq!(balance.deposit(1), Err(BalanceUpdateError::Overflow));
    }
}
