//! Staking: stakes, delegatees, admission control and the block-lifecycle
//! controller

pub mod controller;
pub mod delegatee;
pub mod limiter;
pub mod stake;

pub use controller::{GenesisValidator, StakeController, ValidatorPower};
pub use delegatee::Delegatee;
pub use limiter::StakeLimiter;
pub use stake::Stake;

use crate::account::AccountError;
use crate::core::transaction::TrxError;
use crate::ledger::LedgerError;

/// Staking failures.
///
/// Transaction-level rejections (`UnknownTrxType`, the two ratio caps,
/// payload and lookup misses during validation) drop only the offending
/// transaction. Ledger and commit failures are fatal to the block: a
/// partially applied stake mutation would corrupt the state root.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StakingError {
    #[error(transparent)]
    Trx(#[from] TrxError),

    #[error("delegatee not found")]
    NotFoundDelegatee,

    #[error("stake not found")]
    NotFoundStake,

    #[error("invalid transaction payload: {0}")]
    InvalidTrxPayloadParams(String),

    #[error("individual stake ratio {ratio}% exceeds limit {max}%")]
    IndividualStakeRatio { ratio: u64, max: u64 },

    #[error("updatable stake ratio {ratio}% exceeds limit {max}%")]
    UpdatableStakeRatio { ratio: u64, max: u64 },

    #[error("no block is open")]
    NoOpenBlock,

    #[error("a block is already open at height {0}")]
    BlockAlreadyOpen(u64),

    #[error("ledger is already initialized")]
    AlreadyInitialized,

    #[error("commit version mismatch: delegatee ledger at {delegatee}, frozen ledger at {frozen}")]
    Commit { delegatee: u64, frozen: u64 },

    #[error("unknown query path {0:?}")]
    UnknownQueryPath(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Account(#[from] AccountError),
}
