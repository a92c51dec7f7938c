//! Runtime configuration.
//!
//! Values come from the environment (a `.env` file is honoured); command-line
//! flags override them in the CLI.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::application::{HttpAuditGate, RateTable, RateTableError};

pub const DEFAULT_DATABASE: &str = "fxledger.db";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_AUDIT_GATE_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Failed to load exchange rates: {0}")]
    Rates(#[from] RateTableError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// SQLite database file
    pub database_path: String,
    pub max_connections: u32,
    /// Audit gate endpoint; required for withdrawals only
    pub audit_gate_url: Option<String>,
    pub audit_gate_timeout: Duration,
    /// JSON rate table replacing the built-in one
    pub rates_file: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_path: DEFAULT_DATABASE.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            audit_gate_url: None,
            audit_gate_timeout: Duration::from_secs(DEFAULT_AUDIT_GATE_TIMEOUT_SECS),
            rates_file: None,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let max_connections = match non_empty("LEDGER_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("LEDGER_MAX_CONNECTIONS".to_string()))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        let timeout_secs = match non_empty("AUDIT_GATE_TIMEOUT_SECS") {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("AUDIT_GATE_TIMEOUT_SECS".to_string()))?,
            None => DEFAULT_AUDIT_GATE_TIMEOUT_SECS,
        };

        Ok(Self {
            database_path: non_empty("LEDGER_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            max_connections,
            audit_gate_url: non_empty("AUDIT_GATE_URL"),
            audit_gate_timeout: Duration::from_secs(timeout_secs),
            rates_file: non_empty("LEDGER_RATES_FILE").map(PathBuf::from),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "LEDGER_DATABASE cannot be empty".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "LEDGER_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if self.audit_gate_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "AUDIT_GATE_TIMEOUT_SECS must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.audit_gate_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "AUDIT_GATE_URL must be an http(s) URL, got {}",
                    url
                )));
            }
        }
        Ok(())
    }

    /// The configured rate table, or the built-in one.
    pub fn load_rates(&self) -> Result<RateTable, ConfigError> {
        match &self.rates_file {
            Some(path) => Ok(RateTable::load(path)?),
            None => Ok(RateTable::seed()),
        }
    }

    pub fn audit_gate(&self) -> Result<HttpAuditGate, ConfigError> {
        let url = self
            .audit_gate_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVariable("AUDIT_GATE_URL".to_string()))?;
        HttpAuditGate::new(url, self.audit_gate_timeout)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }
}
