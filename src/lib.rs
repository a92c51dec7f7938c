pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod observability;
pub mod storage;

pub use application::{AccountOperationService, AppError, BalanceService, ExchangeRateService};
pub use domain::*;
pub use storage::Repository;
