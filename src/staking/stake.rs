//! A single delegator's stake

use serde::{Deserialize, Serialize};

use crate::core::transaction::TrxHash;
use crate::core::types::{amount_to_power, Amount, Power};
use crate::crypto::Address;
use crate::ledger::{LedgerItem, LedgerKey};

/// One staking transaction's locked amount and derived voting power.
///
/// Identity is the hash of the transaction that created it. The record
/// is immutable after creation except for `power`, which only decreases
/// (slashing), `reward`, which accumulates, and `refund_height`, set once
/// when the stake is frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Delegator who locked the amount
    pub owner: Address,
    /// Delegatee the power is credited to
    pub to: Address,
    /// Locked amount in base units
    pub amount: Amount,
    /// Voting power derived from `amount` at creation
    pub power: Power,
    /// Hash of the creating transaction; the stake's identity
    pub trx_hash: TrxHash,
    /// Height the stake was created at
    pub start_height: u64,
    /// Height the frozen amount is refunded at; 0 while active
    pub refund_height: u64,
    /// Accumulated block rewards, paid out at unfreeze
    pub reward: u64,
}

impl Stake {
    /// Create a stake from a transferred amount, converting it to power
    /// at the protocol ratio
    pub fn new(
        owner: Address,
        to: Address,
        amount: Amount,
        trx_hash: TrxHash,
        start_height: u64,
        amount_per_power: Amount,
    ) -> Self {
        Self {
            owner,
            to,
            amount,
            power: amount_to_power(amount, amount_per_power),
            trx_hash,
            start_height,
            refund_height: 0,
            reward: 0,
        }
    }

    /// Whether the delegator is the delegatee itself
    pub fn is_self_stake(&self) -> bool {
        self.owner == self.to
    }

    /// Whether the stake sits in the frozen ledger awaiting refund
    pub fn is_frozen(&self) -> bool {
        self.refund_height > 0
    }

    /// Whether a frozen stake has matured at `height`
    pub fn is_refundable(&self, height: u64) -> bool {
        self.is_frozen() && self.refund_height <= height
    }

    /// Move the stake into its frozen state
    pub fn freeze(&mut self, refund_height: u64) {
        self.refund_height = refund_height;
    }

    /// Accumulate one block's reward; returns the amount added
    pub fn apply_reward(&mut self, reward_per_power: u64) -> u64 {
        let issued = self.power.saturating_mul(reward_per_power);
        self.reward = self.reward.saturating_add(issued);
        issued
    }
}

impl LedgerItem for Stake {
    fn ledger_key(&self) -> LedgerKey {
        LedgerKey::from(self.trx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    fn stake(amount: Amount) -> Stake {
        Stake::new(
            Address::new([1u8; 32]),
            Address::new([2u8; 32]),
            amount,
            Hash::hash(b"stake-tx"),
            10,
            1_000,
        )
    }

    #[test]
    fn test_power_derived_at_creation() {
        let s = stake(5_500);
        assert_eq!(s.power, 5);
        assert!(!s.is_self_stake());
        assert!(!s.is_frozen());
    }

    #[test]
    fn test_freeze_and_maturity() {
        let mut s = stake(1_000);
        s.freeze(100);
        assert!(s.is_frozen());
        assert!(!s.is_refundable(99));
        assert!(s.is_refundable(100));
        assert!(s.is_refundable(150));
    }

    #[test]
    fn test_reward_accumulates() {
        let mut s = stake(3_000); // power 3
        assert_eq!(s.apply_reward(10), 30);
        assert_eq!(s.apply_reward(10), 30);
        assert_eq!(s.reward, 60);
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut s = stake(7_000);
        s.freeze(55);
        s.reward = 42;
        let bytes = bincode::serialize(&s).unwrap();
        let back: Stake = bincode::deserialize(&bytes).unwrap();
        assert_eq!(s, back);
    }
}
