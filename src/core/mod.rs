//! Core value types: amounts, powers, block context and transactions

pub mod transaction;
pub mod types;

pub use transaction::{Trx, TrxError, TrxHash, TrxPayload, TRX_KIND_STAKING, TRX_KIND_UNSTAKING};
pub use types::{amount_to_power, power_to_amount, Amount, BlockContext, Power};
