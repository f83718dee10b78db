//! Governance parameter boundary
//!
//! The node keeps governance parameters in its own versioned store; the
//! staking core reads them through this trait. [`StaticParams`] is a
//! fixed-value implementation for genesis defaults, tests and tooling.

use serde::{Deserialize, Serialize};

use crate::core::types::Amount;
use crate::{AMOUNT_PER_POWER, MAX_VALIDATOR_COUNT};

/// Read-only governance parameters consumed by the staking core
pub trait GovParams: Send + Sync {
    /// Size of the active validator set
    fn max_validator_cnt(&self) -> usize;

    /// Reward issued per unit of voting power per rewarded block
    fn reward_per_power(&self) -> u64;

    /// Blocks an unstaked amount stays frozen before refund
    fn lazy_reward_blocks(&self) -> u64;

    /// Percentage of power removed per punished stake
    fn slash_ratio(&self) -> u64;

    /// Amount of base units backing one unit of voting power
    fn amount_per_power(&self) -> Amount;

    /// Maximum percentage of base total power a single delegatee may hold
    fn max_individual_stake_ratio(&self) -> u64;

    /// Maximum percentage of base total power that may churn per block
    fn max_updatable_stake_ratio(&self) -> u64;
}

/// Fixed governance parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticParams {
    pub max_validator_cnt: usize,
    pub reward_per_power: u64,
    pub lazy_reward_blocks: u64,
    pub slash_ratio: u64,
    pub amount_per_power: Amount,
    pub max_individual_stake_ratio: u64,
    pub max_updatable_stake_ratio: u64,
}

impl Default for StaticParams {
    fn default() -> Self {
        Self {
            max_validator_cnt: MAX_VALIDATOR_COUNT,
            reward_per_power: 10,
            lazy_reward_blocks: 2_592_000, // ~30 days at 1s blocks
            slash_ratio: 50,
            amount_per_power: AMOUNT_PER_POWER,
            max_individual_stake_ratio: 33,
            max_updatable_stake_ratio: 33,
        }
    }
}

impl GovParams for StaticParams {
    fn max_validator_cnt(&self) -> usize {
        self.max_validator_cnt
    }

    fn reward_per_power(&self) -> u64 {
        self.reward_per_power
    }

    fn lazy_reward_blocks(&self) -> u64 {
        self.lazy_reward_blocks
    }

    fn slash_ratio(&self) -> u64 {
        self.slash_ratio
    }

    fn amount_per_power(&self) -> Amount {
        self.amount_per_power
    }

    fn max_individual_stake_ratio(&self) -> u64 {
        self.max_individual_stake_ratio
    }

    fn max_updatable_stake_ratio(&self) -> u64 {
        self.max_updatable_stake_ratio
    }
}
