use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    /// Source leg of a currency exchange
    ExchangeOut,
    /// Target leg of a currency exchange
    ExchangeIn,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
            TransactionType::ExchangeOut => "EXCHANGE_OUT",
            TransactionType::ExchangeIn => "EXCHANGE_IN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(TransactionType::Deposit),
            "WITHDRAWAL" => Some(TransactionType::Withdrawal),
            "EXCHANGE_OUT" => Some(TransactionType::ExchangeOut),
            "EXCHANGE_IN" => Some(TransactionType::ExchangeIn),
            _ => None,
        }
    }

    /// Returns true if this movement takes money out of a balance
    pub fn is_outflow(&self) -> bool {
        matches!(
            self,
            TransactionType::Withdrawal | TransactionType::ExchangeOut
        )
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one committed monetary movement.
/// Entries are only ever appended; there is no update or delete path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLog {
    /// Store-assigned append position, 0 until persisted
    pub sequence: i64,
    pub reference_id: Uuid,
    pub account_id: AccountId,
    /// Amount moved (always non-negative; direction is given by `kind`)
    pub amount_cents: Cents,
    pub currency: String,
    pub kind: TransactionType,
    pub created_at: DateTime<Utc>,
}

impl TransactionLog {
    /// Create a new entry with a fresh reference id. The sequence number is
    /// assigned by the repository on append.
    pub fn new(
        account_id: AccountId,
        kind: TransactionType,
        amount_cents: Cents,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            sequence: 0,
            reference_id: Uuid::new_v4(),
            account_id,
            amount_cents,
            currency: currency.into(),
            kind,
            created_at: Utc::now(),
        }
    }

    /// Signed effect of this entry on its balance.
    pub fn signed_amount(&self) -> Cents {
        if self.kind.is_outflow() {
            -self.amount_cents
        } else {
            self.amount_cents
        }
    }
}
