// Application layer: ledger use cases on top of the repository.

mod account_operation;
mod audit_gate;
mod balance_service;
mod error;
mod exchange_rate;
mod transaction_log;

pub use account_operation::*;
pub use audit_gate::*;
pub use balance_service::*;
pub use error::*;
pub use exchange_rate::*;
pub use transaction_log::*;
