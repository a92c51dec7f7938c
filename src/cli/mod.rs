use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{
    AccountOperationService, AppError, BalanceService, ErrorCategory, ExchangeRateService,
};
use crate::config::LedgerConfig;
use crate::domain::{AccountId, Cents, TransactionLog, format_cents, parse_cents};
use crate::storage::Repository;

/// Smallest amount accepted for deposits, withdrawals and exchanges (0.01)
const MIN_AMOUNT_CENTS: Cents = 1;

/// fxledger - Multi-currency account ledger
#[derive(Parser)]
#[command(name = "fxledger")]
#[command(about = "Multi-currency account balances with an append-only transaction log")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides LEDGER_DATABASE)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// JSON exchange rate table (overrides LEDGER_RATES_FILE)
    #[arg(long, global = true)]
    pub rates_file: Option<PathBuf>,

    /// Audit gate URL consulted before withdrawals (overrides AUDIT_GATE_URL)
    #[arg(long, global = true)]
    pub audit_gate_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Deposit money into an account
    Deposit {
        /// Account id
        account: AccountId,

        /// Amount to deposit (e.g., "50.00" or "50")
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Three-letter currency code
        currency: String,
    },

    /// Withdraw money from an account (requires the audit gate)
    Withdraw {
        /// Account id
        account: AccountId,

        /// Amount to withdraw
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Three-letter currency code
        currency: String,
    },

    /// Show one balance, or every balance of an account
    Balance {
        /// Account id
        account: AccountId,

        /// Currency (omit for all balances)
        currency: Option<String>,
    },

    /// Exchange money between two currencies of the same account
    Exchange {
        /// Account id
        account: AccountId,

        /// Amount to exchange, in the source currency
        #[arg(allow_negative_numbers = true)]
        amount: String,

        /// Source currency
        #[arg(long)]
        from: String,

        /// Target currency
        #[arg(long)]
        to: String,
    },

    /// Show the transaction log of an account
    History {
        /// Account id
        account: AccountId,

        /// Only show the most recent entries
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show the exchange rate table
    Rates,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Create a new account
    Create,

    /// Show an account and its balances
    Show {
        /// Account id
        id: AccountId,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> Result<LedgerConfig> {
        let mut config = LedgerConfig::from_env().context("Invalid configuration")?;
        if let Some(database) = &self.database {
            config.database_path = database.clone();
        }
        if let Some(rates_file) = &self.rates_file {
            config.rates_file = Some(rates_file.clone());
        }
        if let Some(url) = &self.audit_gate_url {
            config.audit_gate_url = Some(url.clone());
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        let config = self.config()?;

        match self.command {
            Commands::Init => {
                Repository::init(&config.database_path, config.max_connections).await?;
                println!("Database initialized: {}", config.database_path);
            }

            Commands::Account(account_cmd) => {
                let service = connect(&config).await?;
                run_account_command(&service, account_cmd).await?;
            }

            Commands::Deposit {
                account,
                amount,
                currency,
            } => {
                let amount_cents = parse_amount(&amount)?;
                let service = connect(&config).await?;
                let entry = service.deposit(account, &currency, amount_cents).await?;
                println!(
                    "Deposited {} {} into account {}. Balance: {} {}",
                    format_cents(amount_cents),
                    entry.currency,
                    account,
                    format_cents(entry.amount_cents),
                    entry.currency
                );
            }

            Commands::Withdraw {
                account,
                amount,
                currency,
            } => {
                let amount_cents = parse_amount(&amount)?;
                let service = connect(&config).await?;
                let gate = config
                    .audit_gate()
                    .context("Withdrawals need an audit gate")?;
                let operations = AccountOperationService::new(Arc::new(gate), service);

                let entry = operations
                    .debit_account(account, &currency, amount_cents)
                    .await?;
                println!(
                    "Withdrew {} {} from account {}. Balance: {} {}",
                    format_cents(amount_cents),
                    entry.currency,
                    account,
                    format_cents(entry.amount_cents),
                    entry.currency
                );
            }

            Commands::Balance { account, currency } => {
                let service = connect(&config).await?;
                run_balance_command(&service, account, currency).await?;
            }

            Commands::Exchange {
                account,
                amount,
                from,
                to,
            } => {
                let amount_cents = parse_amount(&amount)?;
                let (from, to) = (from.to_uppercase(), to.to_uppercase());
                let service = connect(&config).await?;
                let entry = service.exchange(account, &from, &to, amount_cents).await?;
                println!(
                    "Exchanged {} {} into {}. Balance: {} {}",
                    format_cents(amount_cents),
                    from,
                    entry.currency,
                    format_cents(entry.amount_cents),
                    entry.currency
                );
            }

            Commands::History { account, limit } => {
                let service = connect(&config).await?;
                let entries = service.history(account, limit).await?;
                print_history(&entries);
            }

            Commands::Rates => {
                let rates = ExchangeRateService::new(config.load_rates()?);
                let table = rates.table();
                println!("Rate table: {} (base EUR)", table.version());
                println!("{:<10} {:>14}", "CURRENCY", "RATE");
                println!("{}", "-".repeat(25));
                for (currency, rate) in table.iter() {
                    println!("{:<10} {:>14}", currency, rate);
                }
            }
        }

        Ok(())
    }
}

/// Process exit code for a failed command, by error category.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    let category = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<AppError>())
        .map(AppError::category);

    match category {
        Some(ErrorCategory::ClientError) => 2,
        Some(ErrorCategory::Conflict) => 3,
        Some(ErrorCategory::ServiceUnavailable) => 4,
        Some(ErrorCategory::Internal) | None => 1,
    }
}

async fn connect(config: &LedgerConfig) -> Result<BalanceService> {
    let repo = Repository::connect(&config.database_path, config.max_connections)
        .await
        .with_context(|| {
            format!(
                "Cannot open ledger at {} (run `fxledger init` first)",
                config.database_path
            )
        })?;
    let rates = ExchangeRateService::new(config.load_rates()?);
    Ok(BalanceService::new(repo, rates))
}

/// Parse a command-line amount; anything below 0.01 is refused.
fn parse_amount(input: &str) -> Result<Cents, AppError> {
    let cents = parse_cents(input)
        .map_err(|e| AppError::IllegalArgument(format!("Invalid amount '{}': {}", input, e)))?;
    if cents < MIN_AMOUNT_CENTS {
        return Err(AppError::IllegalArgument(format!(
            "Amount must be at least 0.01, got '{}'",
            input
        )));
    }
    Ok(cents)
}

async fn run_account_command(service: &BalanceService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Create => {
            let account = service.open_account().await?;
            println!("Created account: {}", account.id);
        }

        AccountCommands::Show { id } => {
            let statement = service.account_statement(id).await?;

            println!("Account: {}", statement.account.id);
            println!(
                "  Created:  {}",
                statement.account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            if statement.balances().is_empty() {
                println!("  No balances.");
            } else {
                for entry in statement.entries() {
                    println!(
                        "  {:<8} {:>14}",
                        entry.currency,
                        format_cents(entry.amount_cents)
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_balance_command(
    service: &BalanceService,
    account: AccountId,
    currency: Option<String>,
) -> Result<()> {
    match currency {
        Some(currency) => {
            let entry = service.get_balance(account, &currency).await?;
            println!(
                "Account {}: {} {}",
                account,
                format_cents(entry.amount_cents),
                entry.currency
            );
        }
        None => {
            let statement = service.account_statement(account).await?;
            if statement.balances().is_empty() {
                println!("No balances found.");
            } else {
                println!("{:<10} {:>14}", "CURRENCY", "BALANCE");
                println!("{}", "-".repeat(25));
                for entry in statement.entries() {
                    println!(
                        "{:<10} {:>14}",
                        entry.currency,
                        format_cents(entry.amount_cents)
                    );
                }
            }
        }
    }
    Ok(())
}

fn print_history(entries: &[TransactionLog]) {
    if entries.is_empty() {
        println!("No transactions found.");
        return;
    }

    println!(
        "{:>6} {:<20} {:<13} {:>14} {:<8} REFERENCE",
        "SEQ", "DATE", "KIND", "AMOUNT", "CURRENCY"
    );
    println!("{}", "-".repeat(100));
    for entry in entries {
        println!(
            "{:>6} {:<20} {:<13} {:>14} {:<8} {}",
            entry.sequence,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.kind,
            format_cents(entry.signed_amount()),
            entry.currency,
            entry.reference_id
        );
    }
}
