use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Account, AccountId, Balance, TransactionLog, TransactionType};

use super::error::{StoreError, is_unique_violation};
use super::MIGRATION_001_INITIAL;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open database transaction owned by one ledger operation.
///
/// Every write the ledger performs goes through a `UnitOfWork`; nothing commits
/// until [`UnitOfWork::commit`] is called, and dropping it without committing
/// rolls everything back.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
}

impl UnitOfWork {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::from_sqlx("commit transaction", e))
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx
            .rollback()
            .await
            .context("Failed to roll back transaction")
    }
}

/// Repository for persisting and querying accounts, balances and the transaction log.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to an existing SQLite database file.
    pub async fn connect(database_path: &str, max_connections: u32) -> Result<Self> {
        Self::open(database_path, max_connections, false).await
    }

    /// Initialize a database (create the file if needed + migrate).
    pub async fn init(database_path: &str, max_connections: u32) -> Result<Self> {
        let repo = Self::open(database_path, max_connections, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    async fn open(database_path: &str, max_connections: u32, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to database at {}", database_path))?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Start a unit of work.
    pub async fn begin(&self) -> Result<UnitOfWork, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_sqlx("begin transaction", e))?;
        Ok(UnitOfWork { tx })
    }

    // ========================
    // Account operations
    // ========================

    /// Create a new account and return it with its assigned id.
    pub async fn create_account(&self) -> Result<Account> {
        let created_at = Utc::now();
        let row = sqlx::query("INSERT INTO accounts (created_at) VALUES (?) RETURNING id")
            .bind(created_at.to_rfc3339())
            .fetch_one(&self.pool)
            .await
            .context("Failed to create account")?;

        Ok(Account {
            id: row.get("id"),
            created_at,
        })
    }

    /// Get an account by id, outside of any unit of work.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query("SELECT id, created_at FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    /// Look up an account inside a unit of work.
    pub async fn find_account(
        &self,
        uow: &mut UnitOfWork,
        id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT id, created_at FROM accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *uow.tx)
            .await
            .map_err(|e| StoreError::from_sqlx("fetch account", e))?;

        Ok(row.as_ref().map(Self::row_to_account).transpose()?)
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let created_at_str: String = row.get("created_at");
        Ok(Account {
            id: row.get("id"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    // ========================
    // Balance operations
    // ========================

    /// Find the balance for (account, currency) inside a unit of work.
    pub async fn find_balance(
        &self,
        uow: &mut UnitOfWork,
        account_id: AccountId,
        currency: &str,
    ) -> Result<Option<Balance>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, currency, amount_cents, version
            FROM balances
            WHERE account_id = ? AND currency = ?
            "#,
        )
        .bind(account_id)
        .bind(currency)
        .fetch_optional(&mut *uow.tx)
        .await
        .map_err(|e| StoreError::from_sqlx("fetch balance", e))?;

        Ok(row.as_ref().map(Self::row_to_balance))
    }

    /// Read a balance without opening a unit of work.
    pub async fn get_balance(&self, account_id: AccountId, currency: &str) -> Result<Option<Balance>> {
        let row = sqlx::query(
            r#"
            SELECT id, account_id, currency, amount_cents, version
            FROM balances
            WHERE account_id = ? AND currency = ?
            "#,
        )
        .bind(account_id)
        .bind(currency)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch balance")?;

        Ok(row.as_ref().map(Self::row_to_balance))
    }

    /// List all balances held by an account, ordered by currency.
    pub async fn list_balances(&self, account_id: AccountId) -> Result<Vec<Balance>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, currency, amount_cents, version
            FROM balances
            WHERE account_id = ?
            ORDER BY currency
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list balances")?;

        Ok(rows.iter().map(Self::row_to_balance).collect())
    }

    /// Persist a balance, returning it with its new id/version.
    ///
    /// New balances are inserted; the unique (account, currency) key rejects a
    /// concurrent creator. Existing balances are only updated if the stored
    /// version still equals `balance.version`; otherwise the write is rejected
    /// with [`StoreError::Conflict`].
    pub async fn save_balance(
        &self,
        uow: &mut UnitOfWork,
        balance: &Balance,
    ) -> Result<Balance, StoreError> {
        let conflict = || StoreError::Conflict {
            account_id: balance.account_id,
            currency: balance.currency.clone(),
            expected_version: balance.version,
        };

        match balance.id {
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO balances (account_id, currency, amount_cents, version)
                    VALUES (?, ?, ?, 0)
                    RETURNING id, version
                    "#,
                )
                .bind(balance.account_id)
                .bind(&balance.currency)
                .bind(balance.amount_cents)
                .fetch_one(&mut *uow.tx)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        conflict()
                    } else {
                        StoreError::from_sqlx("insert balance", e)
                    }
                })?;

                debug!(
                    account_id = balance.account_id,
                    currency = %balance.currency,
                    amount_cents = balance.amount_cents,
                    "Inserted balance"
                );

                Ok(Balance {
                    id: Some(row.get("id")),
                    version: row.get("version"),
                    ..balance.clone()
                })
            }
            Some(id) => {
                let row = sqlx::query(
                    r#"
                    UPDATE balances
                    SET amount_cents = ?, version = version + 1
                    WHERE id = ? AND version = ?
                    RETURNING version
                    "#,
                )
                .bind(balance.amount_cents)
                .bind(id)
                .bind(balance.version)
                .fetch_optional(&mut *uow.tx)
                .await
                .map_err(|e| StoreError::from_sqlx("update balance", e))?;

                let row = row.ok_or_else(conflict)?;
                let version: i64 = row.get("version");

                debug!(
                    account_id = balance.account_id,
                    currency = %balance.currency,
                    amount_cents = balance.amount_cents,
                    version,
                    "Updated balance"
                );

                Ok(Balance {
                    version,
                    ..balance.clone()
                })
            }
        }
    }

    fn row_to_balance(row: &SqliteRow) -> Balance {
        Balance {
            id: Some(row.get("id")),
            account_id: row.get("account_id"),
            currency: row.get("currency"),
            amount_cents: row.get("amount_cents"),
            version: row.get("version"),
        }
    }

    // ========================
    // Transaction log operations
    // ========================

    /// Append a log entry inside a unit of work.
    /// Assigns the next sequence number to `entry`.
    pub async fn append_log(
        &self,
        uow: &mut UnitOfWork,
        entry: &mut TransactionLog,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO transaction_log (reference_id, account_id, amount_cents, currency, kind, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING sequence
            "#,
        )
        .bind(entry.reference_id.to_string())
        .bind(entry.account_id)
        .bind(entry.amount_cents)
        .bind(&entry.currency)
        .bind(entry.kind.as_str())
        .bind(entry.created_at.to_rfc3339())
        .fetch_one(&mut *uow.tx)
        .await
        .map_err(|e| StoreError::from_sqlx("append transaction log", e))?;

        entry.sequence = row.get("sequence");
        Ok(())
    }

    /// List log entries for an account in append order.
    /// With a limit, the most recent `limit` entries are returned (still oldest first).
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionLog>> {
        // SQLite treats a negative limit as unbounded
        let limit = limit.map_or(-1, |lim| i64::try_from(lim).unwrap_or(i64::MAX));

        let rows = sqlx::query(
            r#"
            SELECT sequence, reference_id, account_id, amount_cents, currency, kind, created_at
            FROM transaction_log
            WHERE account_id = ?
            ORDER BY sequence DESC
            LIMIT ?
            "#,
        )
            .bind(account_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions")?;

        let mut entries = rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    /// Count log entries for an account.
    pub async fn count_transactions(&self, account_id: AccountId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM transaction_log WHERE account_id = ?")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?;

        Ok(row.get("count"))
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<TransactionLog> {
        let reference_id_str: String = row.get("reference_id");
        let kind_str: String = row.get("kind");
        let created_at_str: String = row.get("created_at");

        Ok(TransactionLog {
            sequence: row.get("sequence"),
            reference_id: Uuid::parse_str(&reference_id_str).context("Invalid reference ID")?,
            account_id: row.get("account_id"),
            amount_cents: row.get("amount_cents"),
            currency: row.get("currency"),
            kind: TransactionType::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .context("Invalid timestamp")?
        .with_timezone(&Utc))
}
