//! Fixed-table currency conversion.
//!
//! Rates are expressed against EUR and held in an immutable, versioned
//! [`RateTable`]. Conversions use arbitrary-precision decimals and round the
//! result to whole cents with banker's rounding.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive, Zero};
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{Cents, is_iso_currency};

use super::AppError;

/// Currency every rate is quoted against.
pub const BASE_CURRENCY: &str = "EUR";

/// Version label of the built-in table.
pub const SEED_RATES_VERSION: &str = "seed";

#[derive(Debug, Error)]
pub enum RateTableError {
    #[error("Failed to read rate table {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed rate table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate for {currency} is not a decimal number: {value}")]
    InvalidRate { currency: String, value: String },

    #[error("Rate for {0} must be greater than zero")]
    NonPositiveRate(String),

    #[error("{0} is not an ISO 4217 currency code")]
    UnknownCurrency(String),

    #[error("Rate table must contain the base currency {}", BASE_CURRENCY)]
    MissingBaseCurrency,
}

/// On-disk form. Rates are strings so they are never routed through `f64`.
#[derive(Deserialize)]
struct RateFile {
    version: String,
    rates: BTreeMap<String, String>,
}

/// Currency code → rate to EUR, plus a version label.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    version: String,
    rates: BTreeMap<String, BigDecimal>,
}

impl RateTable {
    /// Build a validated table.
    pub fn new(
        version: impl Into<String>,
        rates: impl IntoIterator<Item = (String, BigDecimal)>,
    ) -> Result<Self, RateTableError> {
        let mut table = BTreeMap::new();
        for (currency, rate) in rates {
            if !is_iso_currency(&currency) {
                return Err(RateTableError::UnknownCurrency(currency));
            }
            if rate <= BigDecimal::zero() {
                return Err(RateTableError::NonPositiveRate(currency));
            }
            table.insert(currency, rate);
        }
        if !table.contains_key(BASE_CURRENCY) {
            return Err(RateTableError::MissingBaseCurrency);
        }

        Ok(Self {
            version: version.into(),
            rates: table,
        })
    }

    /// The built-in table: EUR=1, USD=1.05, SEK=11.50, RUB=105.00.
    pub fn seed() -> Self {
        let rate = |mantissa: i64| BigDecimal::new(mantissa.into(), 2);
        let rates = [
            ("EUR", rate(100)),
            ("USD", rate(105)),
            ("SEK", rate(1150)),
            ("RUB", rate(10500)),
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();

        Self {
            version: SEED_RATES_VERSION.to_string(),
            rates,
        }
    }

    /// Parse a table from JSON of the form
    /// `{"version": "...", "rates": {"EUR": "1", "USD": "1.05"}}`.
    pub fn from_json(json: &str) -> Result<Self, RateTableError> {
        let file: RateFile = serde_json::from_str(json)?;
        let mut rates = Vec::with_capacity(file.rates.len());
        for (currency, value) in file.rates {
            let rate = BigDecimal::from_str(value.trim()).map_err(|_| RateTableError::InvalidRate {
                currency: currency.clone(),
                value: value.clone(),
            })?;
            rates.push((currency, rate));
        }
        Self::new(file.version, rates)
    }

    pub fn load(path: &Path) -> Result<Self, RateTableError> {
        let json = std::fs::read_to_string(path).map_err(|source| RateTableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rate(&self, currency: &str) -> Option<&BigDecimal> {
        self.rates.get(currency)
    }

    /// Rates ordered by currency code.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BigDecimal)> {
        self.rates.iter().map(|(code, rate)| (code.as_str(), rate))
    }
}

impl Default for RateTable {
    fn default() -> Self {
        Self::seed()
    }
}

/// Converts amounts between the currencies of one rate table. Pure; no I/O.
#[derive(Debug, Clone, Default)]
pub struct ExchangeRateService {
    table: RateTable,
}

impl ExchangeRateService {
    pub fn new(table: RateTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RateTable {
        &self.table
    }

    pub fn is_supported(&self, currency: &str) -> bool {
        self.table.rate(currency).is_some()
    }

    /// Convert `amount_cents` of `from` into `to`, rounded half-to-even to the cent.
    pub fn convert(&self, from: &str, to: &str, amount_cents: Cents) -> Result<Cents, AppError> {
        let rate_from = self
            .table
            .rate(from)
            .ok_or_else(|| AppError::CurrencyExchange(format!("unsupported currency {}", from)))?;
        let rate_to = self
            .table
            .rate(to)
            .ok_or_else(|| AppError::CurrencyExchange(format!("unsupported currency {}", to)))?;

        // Working in cents, rounding to scale 0 is rounding the amount to 2 places.
        let converted = (BigDecimal::from(amount_cents) * rate_to / rate_from)
            .with_scale_round(0, RoundingMode::HalfEven);

        converted.to_i64().ok_or_else(|| {
            AppError::CurrencyExchange(format!(
                "converted amount of {} cents {} is out of range",
                amount_cents, from
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> ExchangeRateService {
        ExchangeRateService::new(RateTable::seed())
    }

    #[test]
    fn test_seed_conversions() {
        let rates = service();
        assert_eq!(rates.convert("USD", "EUR", 5000).unwrap(), 4762);
        assert_eq!(rates.convert("EUR", "USD", 10000).unwrap(), 10500);
        assert_eq!(rates.convert("USD", "SEK", 1000).unwrap(), 10952);
        assert_eq!(rates.convert("EUR", "RUB", 100).unwrap(), 10500);
    }

    #[test]
    fn test_same_currency_is_identity() {
        assert_eq!(service().convert("SEK", "SEK", 12345).unwrap(), 12345);
    }

    #[test]
    fn test_rounds_half_to_even() {
        let table = RateTable::new(
            "halves",
            [
                ("EUR".to_string(), BigDecimal::from(1)),
                ("USD".to_string(), BigDecimal::from_str("0.5").unwrap()),
            ],
        )
        .unwrap();
        let rates = ExchangeRateService::new(table);

        // 1 cent and 3 cents of EUR are 0.5 and 1.5 cents of USD
        assert_eq!(rates.convert("EUR", "USD", 1).unwrap(), 0);
        assert_eq!(rates.convert("EUR", "USD", 3).unwrap(), 2);
        assert_eq!(rates.convert("EUR", "USD", 5).unwrap(), 2);
    }

    #[test]
    fn test_unsupported_currency() {
        let rates = service();
        assert!(!rates.is_supported("GBP"));
        assert!(matches!(
            rates.convert("GBP", "EUR", 100),
            Err(AppError::CurrencyExchange(_))
        ));
        assert!(matches!(
            rates.convert("EUR", "GBP", 100),
            Err(AppError::CurrencyExchange(_))
        ));
    }

    #[test]
    fn test_seed_table() {
        let table = RateTable::seed();
        assert_eq!(table.version(), SEED_RATES_VERSION);
        let codes: Vec<&str> = table.iter().map(|(code, _)| code).collect();
        assert_eq!(codes, vec!["EUR", "RUB", "SEK", "USD"]);
        assert_eq!(table.rate("SEK"), Some(&BigDecimal::from_str("11.50").unwrap()));
    }

    #[test]
    fn test_from_json() {
        let table = RateTable::from_json(
            r#"{"version": "2026-10", "rates": {"EUR": "1", "GBP": "0.85", "USD": "1.08"}}"#,
        )
        .unwrap();
        assert_eq!(table.version(), "2026-10");

        let rates = ExchangeRateService::new(table);
        assert!(rates.is_supported("GBP"));
        assert!(!rates.is_supported("SEK"));
        assert_eq!(rates.convert("GBP", "EUR", 8500).unwrap(), 10000);
    }

    #[test]
    fn test_from_json_validation() {
        assert!(matches!(
            RateTable::from_json(r#"{"version": "x", "rates": {"USD": "1.05"}}"#),
            Err(RateTableError::MissingBaseCurrency)
        ));
        assert!(matches!(
            RateTable::from_json(r#"{"version": "x", "rates": {"EUR": "1", "USD": "0"}}"#),
            Err(RateTableError::NonPositiveRate(code)) if code == "USD"
        ));
        assert!(matches!(
            RateTable::from_json(r#"{"version": "x", "rates": {"EUR": "1", "ABC": "2"}}"#),
            Err(RateTableError::UnknownCurrency(code)) if code == "ABC"
        ));
        assert!(matches!(
            RateTable::from_json(r#"{"version": "x", "rates": {"EUR": "one"}}"#),
            Err(RateTableError::InvalidRate { .. })
        ));
        assert!(matches!(
            RateTable::from_json("not json"),
            Err(RateTableError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rates.json");
        std::fs::write(&path, r#"{"version": "v2", "rates": {"EUR": "1", "USD": "1.10"}}"#)
            .unwrap();

        let table = RateTable::load(&path).unwrap();
        assert_eq!(table.version(), "v2");

        let missing = RateTable::load(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(RateTableError::Read { .. })));
    }
}
