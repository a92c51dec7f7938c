use thiserror::Error;

use crate::domain::AccountId;

/// Failure on the transactional write path.
///
/// Conflicts are kept apart from other store failures so the service layer can
/// report them as optimistic-concurrency losses instead of infrastructure errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The balance row changed (or appeared) after it was read.
    #[error(
        "balance {currency} of account {account_id} changed since it was read (expected version {expected_version})"
    )]
    Conflict {
        account_id: AccountId,
        currency: String,
        expected_version: i64,
    },

    /// SQLite refused the write because another writer holds or has advanced the database.
    #[error("concurrent write rejected during {operation}: {message}")]
    Contention {
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict { .. } | StoreError::Contention { .. }
        )
    }

    /// Classify a sqlx error raised while executing `operation`.
    pub(crate) fn from_sqlx(operation: &'static str, err: sqlx::Error) -> Self {
        if is_busy(&err) {
            return StoreError::Contention {
                operation,
                message: err.to_string(),
            };
        }
        StoreError::Other(anyhow::Error::new(err).context(format!("Failed to {}", operation)))
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED and their extended codes (e.g. BUSY_SNAPSHOT).
fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
