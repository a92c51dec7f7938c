use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type AccountId = i64;

/// Identity root for a set of per-currency balances.
/// Accounts are never modified after creation; only their balances change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub created_at: DateTime<Utc>,
}
