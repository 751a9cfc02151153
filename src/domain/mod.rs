pub mod reports;
pub mod transaction;

pub use transaction::{CurrencyInfo, Merchant, MerchantSummary, MetaRef, Transaction, TxType};
