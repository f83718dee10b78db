//! # Veridia Staking
//!
//! Staking and validator-management core of the Veridia proof-of-stake
//! chain.
//!
//! ## Core Features
//! - Versioned merkle ledger with per-block commit and state roots
//! - Two-phase execution: speculative checks, finality-working-set writes
//! - Delegated staking with lazy (frozen-then-refunded) unstaking
//! - Per-block admission control bounding validator-set churn
//! - Proportional slashing on misbehavior evidence
//! - Deterministic validator-set selection and minimal diffing
//!
//! The consensus engine drives [`StakeController`] through the block
//! lifecycle (`begin_block`, `validate_trx`/`execute_trx`,
//! `execute_block`, `commit`); networking, signature verification and
//! contract execution live outside this crate.

pub mod account;
pub mod core;
pub mod crypto;
pub mod gov;
pub mod ledger;
pub mod staking;

// Re-exports
pub use crate::core::{
    amount_to_power, power_to_amount, Amount, BlockContext, Power, Trx, TrxError, TrxHash,
    TrxPayload,
};
pub use account::{AccountError, AccountKeeper, MemoryAccountKeeper};
pub use crypto::{Address, Hash};
pub use gov::{GovParams, StaticParams};
pub use ledger::{
    ImmutableLedger, Ledger, LedgerError, LedgerItem, LedgerKey, LedgerMode, VersionedTree,
};
pub use staking::{
    Delegatee, GenesisValidator, Stake, StakeController, StakeLimiter, StakingError,
    ValidatorPower,
};

// =============================================================================
// PROTOCOL CONFIGURATION
// =============================================================================

/// Veridia staking core version
pub const VERIDIA_STAKING_VERSION: &str = "0.1.0";

/// Base units backing one unit of voting power
pub const AMOUNT_PER_POWER: Amount = 1_000_000_000;

/// Active validator set size
pub const MAX_VALIDATOR_COUNT: usize = 21;

/// Module account holding locked stake until refund
pub const STAKING_VAULT: Address = Address([0x76; 32]);
