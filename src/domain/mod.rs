mod account;
mod balance;
mod currency;
mod money;
mod transaction_log;

pub use account::*;
pub use balance::*;
pub use currency::*;
pub use money::*;
pub use transaction_log::*;
