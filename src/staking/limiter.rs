//! Per-block admission control for power-changing transactions
//!
//! The limiter holds a snapshot of every delegatee's power taken at
//! `begin_block` and rations two budgets across the block:
//!
//! - an individual cap: no delegatee may grow past a percentage of the
//!   snapshot's base total power;
//! - an updatable cap: the summed power movement that enters or leaves
//!   the active set may not exceed a percentage of base total power.
//!
//! Rejections drop single transactions; accepted checks update the
//! snapshot so later transactions in the same block see the shifted
//! ranking. The base total power itself stays fixed for the block, which
//! makes a rejection deterministic for a given snapshot regardless of
//! transaction ordering.

use tracing::debug;

use super::StakingError;
use crate::core::types::Power;
use crate::crypto::Address;

/// Power-ranking snapshot with per-block churn accounting
#[derive(Debug, Clone)]
pub struct StakeLimiter {
    /// Delegatee powers, sorted by power descending then address
    powers: Vec<(Address, Power)>,
    /// Summed power of the top `max_validator_cnt` at snapshot time
    base_total_power: Power,
    max_validator_cnt: usize,
    individual_ratio: u64,
    updatable_ratio: u64,
    /// Running churn counter across all checks against this snapshot
    updated_power: Power,
}

impl StakeLimiter {
    /// Snapshot the given delegatee powers
    pub fn new(
        mut powers: Vec<(Address, Power)>,
        max_validator_cnt: usize,
        individual_ratio: u64,
        updatable_ratio: u64,
    ) -> Self {
        sort_by_power(&mut powers);
        let base_total_power = powers
            .iter()
            .take(max_validator_cnt)
            .map(|(_, p)| *p)
            .sum();
        Self {
            powers,
            base_total_power,
            max_validator_cnt,
            individual_ratio,
            updatable_ratio,
            updated_power: 0,
        }
    }

    /// Base total power captured at snapshot time
    pub fn base_total_power(&self) -> Power {
        self.base_total_power
    }

    /// Current snapshot power of a delegatee (0 when absent)
    pub fn power_of(&self, addr: &Address) -> Power {
        self.powers
            .iter()
            .find(|(a, _)| a == addr)
            .map(|(_, p)| *p)
            .unwrap_or(0)
    }

    /// Admit or reject a power change of `delta` for `addr`.
    ///
    /// On acceptance the snapshot is updated and re-ranked and the churn
    /// counter is persisted; a rejected check leaves the limiter
    /// untouched.
    pub fn check_limit(&mut self, addr: &Address, delta: i64) -> Result<(), StakingError> {
        if delta == 0 || self.base_total_power == 0 {
            // an empty chain has no set to protect; bootstrap freely
            return Ok(());
        }

        let power = self.power_of(addr);
        let base = self.base_total_power as u128;

        if delta > 0 {
            let gain = delta as u128;
            let ratio = (power as u128 + gain) * 100 / (base + gain);
            if ratio > self.individual_ratio as u128 {
                debug!(%addr, ratio, "individual stake ratio exceeded");
                return Err(StakingError::IndividualStakeRatio {
                    ratio: ratio as u64,
                    max: self.individual_ratio,
                });
            }
        }

        let churn = self.churn_of(addr, power, delta);
        let updated = self.updated_power.saturating_add(churn);
        let ratio = updated as u128 * 100 / base;
        if ratio > self.updatable_ratio as u128 {
            debug!(%addr, ratio, "updatable stake ratio exceeded");
            return Err(StakingError::UpdatableStakeRatio {
                ratio: ratio as u64,
                max: self.updatable_ratio,
            });
        }

        self.updated_power = updated;
        self.apply(addr, power, delta);
        Ok(())
    }

    /// How much active-set power this change moves.
    ///
    /// A top-set validator losing enough to fall below the runner-up
    /// counts as a full exit; an outside validator overtaking the lowest
    /// active validator counts that validator's power as a full entry.
    fn churn_of(&self, addr: &Address, power: Power, delta: i64) -> Power {
        let k = self.max_validator_cnt;
        let rank = self.powers.iter().position(|(a, _)| a == addr);
        let inside = rank.map(|r| r < k).unwrap_or(false);

        if inside && delta < 0 {
            let loss = delta.unsigned_abs();
            let runner_up = self.powers.get(k).map(|(_, p)| *p).unwrap_or(0);
            if power.saturating_sub(loss) < runner_up {
                power
            } else {
                loss
            }
        } else if !inside && delta > 0 {
            match self.powers.get(k.saturating_sub(1)) {
                Some((_, kth_power)) if self.powers.len() >= k => {
                    if power.saturating_add(delta as u64) > *kth_power {
                        *kth_power
                    } else {
                        0
                    }
                }
                // the set is not full yet; entering displaces no one
                _ => 0,
            }
        } else {
            0
        }
    }

    fn apply(&mut self, addr: &Address, power: Power, delta: i64) {
        let updated = if delta >= 0 {
            power.saturating_add(delta as u64)
        } else {
            power.saturating_sub(delta.unsigned_abs())
        };
        match self.powers.iter_mut().find(|(a, _)| a == addr) {
            Some(entry) => entry.1 = updated,
            None => self.powers.push((*addr, updated)),
        }
        sort_by_power(&mut self.powers);
    }
}

fn sort_by_power(powers: &mut [(Address, Power)]) {
    powers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address::new([seed; 32])
    }

    #[test]
    fn test_individual_cap_worked_example() {
        // base total power 100, limit 33%: a 55-power self-stake on a
        // fresh validator computes (0+55)*100/(100+55) = 35 > 33
        let mut limiter = StakeLimiter::new(vec![(addr(1), 100)], 4, 33, 100);
        let rejected = limiter.check_limit(&addr(2), 55);
        assert!(matches!(
            rejected,
            Err(StakingError::IndividualStakeRatio { ratio: 35, max: 33 })
        ));

        // 49 power computes (0+49)*100/(100+49) = 32 <= 33
        assert!(limiter.check_limit(&addr(2), 49).is_ok());
    }

    #[test]
    fn test_rejection_leaves_snapshot_untouched() {
        let mut limiter = StakeLimiter::new(vec![(addr(1), 100)], 4, 33, 100);
        assert!(limiter.check_limit(&addr(2), 55).is_err());
        assert_eq!(limiter.power_of(&addr(2)), 0);
        assert_eq!(limiter.base_total_power(), 100);

        // rejected again after unrelated accepted traffic: deterministic
        assert!(limiter.check_limit(&addr(3), 10).is_ok());
        assert!(limiter.check_limit(&addr(2), 55).is_err());
    }

    #[test]
    fn test_no_individual_cap_on_decreases() {
        let mut limiter = StakeLimiter::new(vec![(addr(1), 60), (addr(2), 40)], 4, 33, 100);
        assert!(limiter.check_limit(&addr(1), -30).is_ok());
        assert_eq!(limiter.power_of(&addr(1)), 30);
    }

    #[test]
    fn test_bootstrap_with_empty_snapshot() {
        let mut limiter = StakeLimiter::new(vec![], 4, 33, 33);
        assert!(limiter.check_limit(&addr(1), 1_000).is_ok());
    }

    #[test]
    fn test_full_exit_counts_entire_power() {
        // top-2 set: a(50), b(40); runner-up c(30)
        let powers = vec![(addr(1), 50), (addr(2), 40), (addr(3), 30)];
        // updatable limit 50% of base(90) = 45
        let mut limiter = StakeLimiter::new(powers, 2, 100, 50);
        // b losing 15 falls to 25 < 30: full exit, churn 40 <= 45 passes
        assert!(limiter.check_limit(&addr(2), -15).is_ok());
        // any further churn (> 5) now breaches the cap
        let rejected = limiter.check_limit(&addr(1), -10);
        assert!(matches!(
            rejected,
            Err(StakingError::UpdatableStakeRatio { .. })
        ));
    }

    #[test]
    fn test_partial_loss_counts_magnitude_only() {
        let powers = vec![(addr(1), 50), (addr(2), 40), (addr(3), 30)];
        let mut limiter = StakeLimiter::new(powers, 2, 100, 50);
        // a losing 5 stays above the runner-up: churn is just 5
        assert!(limiter.check_limit(&addr(1), -5).is_ok());
        // still has budget for another small move
        assert!(limiter.check_limit(&addr(1), -5).is_ok());
    }

    #[test]
    fn test_full_entry_counts_displaced_power() {
        // top-2: a(50), b(40); c(30) outside
        let powers = vec![(addr(1), 50), (addr(2), 40), (addr(3), 30)];
        // updatable limit 40% of base(90)
        let mut limiter = StakeLimiter::new(powers, 2, 100, 40);
        // c gaining 15 reaches 45 > 40: entering displaces b, so churn is
        // b's full 40 and 40*100/90 = 44 > 40
        let rejected = limiter.check_limit(&addr(3), 15);
        assert!(matches!(
            rejected,
            Err(StakingError::UpdatableStakeRatio { .. })
        ));
        // gaining 5 stays below the k-th validator: no churn, accepted
        assert!(limiter.check_limit(&addr(3), 5).is_ok());
    }

    #[test]
    fn test_accepted_check_updates_ranking() {
        let powers = vec![(addr(1), 50), (addr(2), 40), (addr(3), 30)];
        let mut limiter = StakeLimiter::new(powers, 2, 100, 100);
        assert!(limiter.check_limit(&addr(3), 25).is_ok());
        assert_eq!(limiter.power_of(&addr(3)), 55);
        // c is now ranked first; a dropping out of the set is a full exit
        // relative to the updated ranking, not the original one
        assert!(limiter.check_limit(&addr(1), -45).is_ok());
        assert_eq!(limiter.power_of(&addr(1)), 5);
    }
}
