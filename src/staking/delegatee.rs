//! Validator candidates and their stake collections

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::stake::Stake;
use crate::core::transaction::TrxHash;
use crate::core::types::{power_to_amount, Amount, Power};
use crate::crypto::Address;
use crate::ledger::{LedgerItem, LedgerKey};

/// One validator candidate and the stakes delegated to it.
///
/// Invariants: `self_power <= total_power` and
/// `total_power == Σ stake.power`. A delegatee comes into existence on
/// its first self-stake and is deleted from the ledger when its total
/// power reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegatee {
    /// Validator address
    pub addr: Address,
    /// Validator public key, captured from the bootstrapping self-stake
    pub pub_key: Vec<u8>,
    /// Power of stakes owned by the validator itself
    pub self_power: Power,
    /// Power of all stakes, own and delegated
    pub total_power: Power,
    /// Stakes in insertion order; an owner may appear multiple times
    pub stakes: Vec<Stake>,
    /// Blocks this validator failed to sign
    pub not_signed_blocks: u64,
}

impl Delegatee {
    /// New candidate with no stakes yet
    pub fn new(addr: Address, pub_key: Vec<u8>) -> Self {
        Self {
            addr,
            pub_key,
            self_power: 0,
            total_power: 0,
            stakes: Vec::new(),
            not_signed_blocks: 0,
        }
    }

    /// Append a stake and credit its power
    pub fn add_stake(&mut self, stake: Stake) {
        if stake.is_self_stake() {
            self.self_power = self.self_power.saturating_add(stake.power);
        }
        self.total_power = self.total_power.saturating_add(stake.power);
        self.stakes.push(stake);
    }

    /// Find a stake by the hash of its creating transaction
    pub fn find_stake(&self, trx_hash: &TrxHash) -> Option<&Stake> {
        self.stakes.iter().find(|s| &s.trx_hash == trx_hash)
    }

    /// Detach a stake by its creating transaction hash, debiting its power
    pub fn remove_stake(&mut self, trx_hash: &TrxHash) -> Option<Stake> {
        let idx = self.stakes.iter().position(|s| &s.trx_hash == trx_hash)?;
        let stake = self.stakes.remove(idx);
        if stake.is_self_stake() {
            self.self_power = self.self_power.saturating_sub(stake.power);
        }
        self.total_power = self.total_power.saturating_sub(stake.power);
        Some(stake)
    }

    /// Detach every remaining stake, zeroing the delegatee's power
    pub fn take_all_stakes(&mut self) -> Vec<Stake> {
        self.self_power = 0;
        self.total_power = 0;
        std::mem::take(&mut self.stakes)
    }

    /// Stakes owned by `owner`, in insertion order
    pub fn stakes_of(&self, owner: &Address) -> Vec<&Stake> {
        self.stakes.iter().filter(|s| &s.owner == owner).collect()
    }

    /// Number of stakes
    pub fn stake_count(&self) -> usize {
        self.stakes.len()
    }

    /// Total amount represented by the delegatee's power
    pub fn total_amount(&self, amount_per_power: Amount) -> Amount {
        power_to_amount(self.total_power, amount_per_power)
    }

    /// Issue one block's reward to every stake; returns the total issued
    pub fn apply_reward(&mut self, reward_per_power: u64) -> u64 {
        let mut issued = 0u64;
        for stake in &mut self.stakes {
            issued = issued.saturating_add(stake.apply_reward(reward_per_power));
        }
        issued
    }

    /// Record a block this validator failed to sign
    pub fn mark_not_signed(&mut self) {
        self.not_signed_blocks += 1;
    }

    /// Slash every stake proportionally by `ratio` percent.
    ///
    /// A stake whose slash amount truncates to zero is removed entirely;
    /// dust must not survive a positive slash. Powers are recomputed by
    /// summation afterwards. Returns the total power removed.
    pub fn slash(&mut self, ratio: u64) -> Power {
        let before = self.total_power;
        self.stakes.retain_mut(|stake| {
            let slashed = stake.power.saturating_mul(ratio) / 100;
            if slashed == 0 {
                debug!(trx = %stake.trx_hash, "dust stake removed by slash");
                return false;
            }
            stake.power -= slashed;
            true
        });
        self.recompute_powers();
        before.saturating_sub(self.total_power)
    }

    /// Recompute `self_power` and `total_power` from the stakes
    pub fn recompute_powers(&mut self) {
        self.self_power = self
            .stakes
            .iter()
            .filter(|s| s.is_self_stake())
            .map(|s| s.power)
            .sum();
        self.total_power = self.stakes.iter().map(|s| s.power).sum();
    }
}

impl LedgerItem for Delegatee {
    fn ledger_key(&self) -> LedgerKey {
        LedgerKey::from(self.addr)
    }
}
