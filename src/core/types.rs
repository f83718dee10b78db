//! Core value types shared across the staking modules

use serde::{Deserialize, Serialize};

use crate::crypto::Address;

/// Token amount in base units
pub type Amount = u64;

/// Voting power derived from staked amount
pub type Power = u64;

/// Convert a staked amount into voting power at the protocol ratio.
///
/// Remainders below one unit of power are truncated; they stay locked in
/// the stake's amount and are returned at refund time.
pub fn amount_to_power(amount: Amount, amount_per_power: Amount) -> Power {
    if amount_per_power == 0 {
        return 0;
    }
    amount / amount_per_power
}

/// Convert voting power back into the amount it represents.
pub fn power_to_amount(power: Power, amount_per_power: Amount) -> Amount {
    power.saturating_mul(amount_per_power)
}

/// Per-block context handed to the controller by the consensus engine.
///
/// Built once per block at `begin_block` and echoed into `execute_block`;
/// the controller never derives any of these fields itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockContext {
    /// Height of the block being processed
    pub height: u64,
    /// Total transaction fees collected in this block
    pub fee_collected: Amount,
    /// Address of the block proposer
    pub proposer: Address,
    /// Validators that did not sign the previous block
    pub absent_validators: Vec<Address>,
}

impl BlockContext {
    /// Context for a block with no fees and no absentees
    pub fn new(height: u64) -> Self {
        Self {
            height,
            fee_collected: 0,
            proposer: Address::zero(),
            absent_validators: Vec::new(),
        }
    }

    /// Set the collected fee total
    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee_collected = fee;
        self
    }

    /// Set the proposer address
    pub fn with_proposer(mut self, proposer: Address) -> Self {
        self.proposer = proposer;
        self
    }

    /// Set the validators absent from the previous block's signatures
    pub fn with_absent(mut self, absent: Vec<Address>) -> Self {
        self.absent_validators = absent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_power_conversion() {
        assert_eq!(amount_to_power(5_000, 1_000), 5);
        assert_eq!(amount_to_power(5_999, 1_000), 5);
        assert_eq!(power_to_amount(5, 1_000), 5_000);
    }

    #[test]
    fn test_zero_ratio_yields_no_power() {
        assert_eq!(amount_to_power(1_000, 0), 0);
    }

    #[test]
    fn test_block_context_builder() {
        let absent = vec![Address::new([9u8; 32])];
        let ctx = BlockContext::new(7)
            .with_fee(42)
            .with_absent(absent.clone());
        assert_eq!(ctx.height, 7);
        assert_eq!(ctx.fee_collected, 42);
        assert_eq!(ctx.absent_validators, absent);
    }
}
