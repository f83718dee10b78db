//! Block-lifecycle staking controller
//!
//! The consensus engine drives one controller per chain through a strict
//! per-block sequence: `begin_block`, any number of `validate_trx` /
//! `execute_trx` pairs, `execute_block`, `commit`. Mutating operations
//! take the exclusive state lock; read-only queries take shared locks
//! and may run concurrently with block processing.
//!
//! Two ledgers carry all state: delegatees keyed by address and frozen
//! stakes keyed by the creating transaction hash. They commit together
//! and their versions must never diverge; the block's state hash for
//! this subsystem is the hash of their concatenated roots.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::delegatee::Delegatee;
use super::limiter::StakeLimiter;
use super::stake::Stake;
use super::StakingError;
use crate::account::AccountKeeper;
use crate::core::transaction::{Trx, TrxPayload};
use crate::core::types::{amount_to_power, Amount, BlockContext, Power};
use crate::crypto::{Address, Hash};
use crate::gov::GovParams;
use crate::ledger::{Ledger, LedgerError, LedgerItem, LedgerKey, LedgerMode};
use crate::STAKING_VAULT;

/// One entry of the active validator set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPower {
    pub addr: Address,
    pub power: Power,
}

/// A validator seeded at genesis with a single self-stake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub addr: Address,
    pub pub_key: Vec<u8>,
    pub amount: Amount,
}

struct BlockState {
    /// Active validators chosen at the previous block boundary,
    /// sorted by address
    last_validators: Vec<ValidatorPower>,
    /// Admission-control snapshot for the open block
    limiter: Option<StakeLimiter>,
    /// The block currently being processed
    current: Option<BlockContext>,
}

/// Staking and validator-set controller
pub struct StakeController {
    gov: Arc<dyn GovParams>,
    acct: Arc<dyn AccountKeeper>,
    delegatee_ledger: Ledger<Delegatee>,
    frozen_ledger: Ledger<Stake>,
    state: RwLock<BlockState>,
}

impl StakeController {
    /// In-memory controller
    pub fn new(gov: Arc<dyn GovParams>, acct: Arc<dyn AccountKeeper>) -> Self {
        Self {
            gov,
            acct,
            delegatee_ledger: Ledger::new_memory("delegatees"),
            frozen_ledger: Ledger::new_memory("frozen-stakes"),
            state: RwLock::new(BlockState {
                last_validators: Vec::new(),
                limiter: None,
                current: None,
            }),
        }
    }

    /// Persistent controller backed by two sled trees of `db`.
    /// The remembered validator set is recomputed from committed state.
    pub fn new_persistent(
        gov: Arc<dyn GovParams>,
        acct: Arc<dyn AccountKeeper>,
        db: &sled::Db,
    ) -> Result<Self, StakingError> {
        let delegatee_tree = db
            .open_tree("delegatees")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let frozen_tree = db
            .open_tree("frozen-stakes")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let delegatee_ledger = Ledger::new_persistent("delegatees", delegatee_tree)?;
        let frozen_ledger = Ledger::new_persistent("frozen-stakes", frozen_tree)?;

        let last_validators =
            compute_validator_set(&delegatee_ledger.iterate_committed()?, gov.max_validator_cnt());

        Ok(Self {
            gov,
            acct,
            delegatee_ledger,
            frozen_ledger,
            state: RwLock::new(BlockState {
                last_validators,
                limiter: None,
                current: None,
            }),
        })
    }

    /// Seed one self-stake per genesis validator and commit the genesis
    /// version. Callable once, before any block.
    pub fn init_ledger(
        &self,
        genesis: &[GenesisValidator],
    ) -> Result<(Hash, u64), StakingError> {
        let mut state = self.state.write();
        if self.delegatee_ledger.version() > 0 {
            return Err(StakingError::AlreadyInitialized);
        }

        let amount_per_power = self.gov.amount_per_power();
        for validator in genesis {
            if amount_to_power(validator.amount, amount_per_power) == 0 {
                return Err(StakingError::InvalidTrxPayloadParams(format!(
                    "genesis amount {} is below one unit of power",
                    validator.amount
                )));
            }
            let trx_hash = Hash::hash_multiple(&[b"genesis-stake", validator.addr.as_bytes()]);
            let mut delegatee = Delegatee::new(validator.addr, validator.pub_key.clone());
            delegatee.add_stake(Stake::new(
                validator.addr,
                validator.addr,
                validator.amount,
                trx_hash,
                0,
                amount_per_power,
            ));
            self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
        }

        let delegatees = self.delegatee_ledger.iterate(LedgerMode::Finalizing)?;
        state.last_validators =
            compute_validator_set(&delegatees, self.gov.max_validator_cnt());

        let (state_hash, version) = self.commit_ledgers()?;
        info!(version, validators = state.last_validators.len(), "genesis ledger initialized");
        Ok((state_hash, version))
    }

    /// Open a block. No ledger mutation happens here; the limiter
    /// snapshot is taken from the finality view.
    pub fn begin_block(&self, ctx: BlockContext) -> Result<(), StakingError> {
        let mut state = self.state.write();
        if let Some(open) = &state.current {
            return Err(StakingError::BlockAlreadyOpen(open.height));
        }

        let powers: Vec<(Address, Power)> = self
            .delegatee_ledger
            .iterate(LedgerMode::Finalizing)?
            .into_iter()
            .map(|d| (d.addr, d.total_power))
            .collect();
        state.limiter = Some(StakeLimiter::new(
            powers,
            self.gov.max_validator_cnt(),
            self.gov.max_individual_stake_ratio(),
            self.gov.max_updatable_stake_ratio(),
        ));

        debug!(height = ctx.height, "block opened");
        state.current = Some(ctx);
        Ok(())
    }

    /// Read-only acceptance check. Intentionally lightweight: only
    /// structural payload checks run here, the limiter and existence
    /// checks run at execute time.
    pub fn validate_trx(&self, trx: &Trx) -> Result<(), StakingError> {
        match &trx.payload {
            TrxPayload::Staking { amount } => {
                if *amount == 0 {
                    return Err(StakingError::InvalidTrxPayloadParams(
                        "staking amount is zero".into(),
                    ));
                }
                if amount_to_power(*amount, self.gov.amount_per_power()) == 0 {
                    return Err(StakingError::InvalidTrxPayloadParams(
                        "staking amount is below one unit of power".into(),
                    ));
                }
                Ok(())
            }
            TrxPayload::Unstaking { trx_hash } => {
                if trx_hash.is_zero() {
                    return Err(StakingError::InvalidTrxPayloadParams(
                        "unstaking target hash is zero".into(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Apply one transaction to the finality working set
    pub fn execute_trx(&self, trx: &Trx) -> Result<(), StakingError> {
        let mut state = self.state.write();
        let height = state
            .current
            .as_ref()
            .ok_or(StakingError::NoOpenBlock)?
            .height;

        match &trx.payload {
            TrxPayload::Staking { amount } => {
                self.execute_staking(&mut state, trx, *amount, height)
            }
            TrxPayload::Unstaking { trx_hash } => {
                let target = *trx_hash;
                self.execute_unstaking(&mut state, trx, &target, height)
            }
        }
    }

    fn execute_staking(
        &self,
        state: &mut BlockState,
        trx: &Trx,
        amount: Amount,
        height: u64,
    ) -> Result<(), StakingError> {
        let power = amount_to_power(amount, self.gov.amount_per_power());
        if power == 0 {
            return Err(StakingError::InvalidTrxPayloadParams(
                "staking amount is below one unit of power".into(),
            ));
        }

        // resolve the recipient before the limiter so a lookup miss
        // cannot consume churn budget
        let mut delegatee =
            match self.delegatee_ledger.get(LedgerMode::Finalizing, &LedgerKey::from(trx.to)) {
                Ok(found) => found,
                Err(LedgerError::NotFoundResult) if trx.from == trx.to => {
                    // self-staking bootstraps candidacy
                    info!(addr = %trx.to, "new delegatee registered");
                    Delegatee::new(trx.to, trx.pub_key.clone())
                }
                Err(LedgerError::NotFoundResult) => return Err(StakingError::NotFoundDelegatee),
                Err(e) => return Err(e.into()),
            };

        if let Some(limiter) = state.limiter.as_mut() {
            limiter.check_limit(&trx.to, power as i64)?;
        }

        delegatee.add_stake(Stake::new(
            trx.from,
            trx.to,
            amount,
            trx.hash,
            height,
            self.gov.amount_per_power(),
        ));
        self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
        Ok(())
    }

    fn execute_unstaking(
        &self,
        state: &mut BlockState,
        trx: &Trx,
        target: &Hash,
        height: u64,
    ) -> Result<(), StakingError> {
        let mut delegatee = self
            .delegatee_ledger
            .get(LedgerMode::Finalizing, &LedgerKey::from(trx.to))
            .map_err(not_found_delegatee)?;

        // mutation happens on a local copy; nothing reaches the ledger
        // until the limiter admits the change
        let mut stake = delegatee
            .remove_stake(target)
            .ok_or(StakingError::NotFoundStake)?;

        if let Some(limiter) = state.limiter.as_mut() {
            limiter.check_limit(&trx.to, -(stake.power as i64))?;
        }

        let refund_height = height + self.gov.lazy_reward_blocks();
        stake.freeze(refund_height);
        self.frozen_ledger.set(LedgerMode::Finalizing, stake);

        if delegatee.self_power == 0 && !delegatee.stakes.is_empty() {
            // a delegatee cannot carry delegated power with no skin of
            // its own: freeze everything that remains
            warn!(addr = %trx.to, "self power exhausted, freezing all delegated stakes");
            for mut orphan in delegatee.take_all_stakes() {
                orphan.freeze(refund_height);
                self.frozen_ledger.set(LedgerMode::Finalizing, orphan);
            }
        }

        if delegatee.total_power == 0 {
            self.delegatee_ledger
                .del(LedgerMode::Finalizing, &LedgerKey::from(trx.to))?;
            info!(addr = %trx.to, "delegatee retired");
        } else {
            self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
        }
        Ok(())
    }

    /// End-of-block: absentee accounting, lagged rewards, unfreezing and
    /// validator-set recomputation. Returns the minimal change-set
    /// against the previous validator set.
    pub fn execute_block(
        &self,
        ctx: &BlockContext,
    ) -> Result<Vec<ValidatorPower>, StakingError> {
        let mut state = self.state.write();
        if state.current.is_none() {
            return Err(StakingError::NoOpenBlock);
        }

        for absent in &ctx.absent_validators {
            match self
                .delegatee_ledger
                .get(LedgerMode::Finalizing, &LedgerKey::from(*absent))
            {
                Ok(mut delegatee) => {
                    delegatee.mark_not_signed();
                    self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
                }
                Err(LedgerError::NotFoundResult) => {
                    warn!(addr = %absent, "absent validator no longer in ledger");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if ctx.fee_collected > 0 {
            // reward timing lags one block: the recipients are the
            // validators of the previous block's finalized state
            let reward_per_power = self.gov.reward_per_power();
            for validator in &state.last_validators {
                match self
                    .delegatee_ledger
                    .get(LedgerMode::Finalizing, &LedgerKey::from(validator.addr))
                {
                    Ok(mut delegatee) => {
                        let issued = delegatee.apply_reward(reward_per_power);
                        debug!(addr = %validator.addr, issued, "block reward issued");
                        self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
                    }
                    Err(LedgerError::NotFoundResult) => {
                        debug!(addr = %validator.addr, "validator unstaked before reward");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.unfreeze_matured(ctx.height)?;

        let delegatees = self.delegatee_ledger.iterate(LedgerMode::Finalizing)?;
        let new_set = compute_validator_set(&delegatees, self.gov.max_validator_cnt());
        let updates = validator_updates(&state.last_validators, &new_set);
        state.last_validators = new_set;
        Ok(updates)
    }

    fn unfreeze_matured(&self, height: u64) -> Result<(), StakingError> {
        for stake in self.frozen_ledger.iterate(LedgerMode::Finalizing)? {
            if !stake.is_refundable(height) {
                continue;
            }
            self.acct.find_or_new(&stake.owner);
            self.acct
                .transfer(&STAKING_VAULT, &stake.owner, stake.amount)?;
            if stake.reward > 0 {
                self.acct.reward(&stake.owner, stake.reward)?;
            }
            self.frozen_ledger
                .del(LedgerMode::Finalizing, &stake.ledger_key())?;
            info!(
                owner = %stake.owner,
                amount = stake.amount,
                reward = stake.reward,
                "frozen stake refunded"
            );
        }
        Ok(())
    }

    /// Seal the block: commit both ledgers in lockstep and return the
    /// combined state hash and version
    pub fn commit(&self) -> Result<(Hash, u64), StakingError> {
        let mut state = self.state.write();
        let height = state
            .current
            .as_ref()
            .ok_or(StakingError::NoOpenBlock)?
            .height;

        let (state_hash, version) = self.commit_ledgers()?;
        state.current = None;
        state.limiter = None;
        info!(height, version, hash = %state_hash, "staking state committed");
        Ok((state_hash, version))
    }

    fn commit_ledgers(&self) -> Result<(Hash, u64), StakingError> {
        let (delegatee_root, delegatee_version) = self.delegatee_ledger.commit()?;
        let (frozen_root, frozen_version) = self.frozen_ledger.commit()?;
        if delegatee_version != frozen_version {
            return Err(StakingError::Commit {
                delegatee: delegatee_version,
                frozen: frozen_version,
            });
        }
        let state_hash =
            Hash::hash_multiple(&[delegatee_root.as_bytes(), frozen_root.as_bytes()]);
        Ok((state_hash, delegatee_version))
    }

    /// Slash every stake of the delegatee named by misbehavior evidence.
    /// Returns the total power removed.
    pub fn do_punish(
        &self,
        evidence_addr: &Address,
        slash_ratio: u64,
    ) -> Result<Power, StakingError> {
        let _state = self.state.write();
        let mut delegatee = self
            .delegatee_ledger
            .get(LedgerMode::Finalizing, &LedgerKey::from(*evidence_addr))
            .map_err(not_found_delegatee)?;

        let slashed = delegatee.slash(slash_ratio);
        if delegatee.total_power == 0 {
            self.delegatee_ledger
                .del(LedgerMode::Finalizing, &LedgerKey::from(*evidence_addr))?;
        } else {
            self.delegatee_ledger.set(LedgerMode::Finalizing, delegatee);
        }
        warn!(addr = %evidence_addr, slashed, ratio = slash_ratio, "delegatee punished");
        Ok(slashed)
    }

    // ---- read-only helpers, served from the finality view ----

    /// Validators chosen at the previous block boundary
    pub fn validators(&self) -> Vec<ValidatorPower> {
        self.state.read().last_validators.clone()
    }

    /// Whether `addr` is in the active validator set
    pub fn is_validator(&self, addr: &Address) -> bool {
        self.state
            .read()
            .last_validators
            .iter()
            .any(|v| &v.addr == addr)
    }

    /// Total power of one delegatee
    pub fn power_of(&self, addr: &Address) -> Result<Power, StakingError> {
        self.delegatee_ledger
            .get(LedgerMode::Finalizing, &LedgerKey::from(*addr))
            .map(|d| d.total_power)
            .map_err(not_found_delegatee)
    }

    /// Summed power of all delegatees
    pub fn total_power(&self) -> Result<Power, StakingError> {
        Ok(self
            .delegatee_ledger
            .iterate(LedgerMode::Finalizing)?
            .iter()
            .map(|d| d.total_power)
            .sum())
    }

    /// Summed amount represented by all delegatees' power
    pub fn total_amount(&self) -> Result<Amount, StakingError> {
        let amount_per_power = self.gov.amount_per_power();
        Ok(self
            .delegatee_ledger
            .iterate(LedgerMode::Finalizing)?
            .iter()
            .map(|d| d.total_amount(amount_per_power))
            .sum())
    }

    /// All stakes awaiting refund
    pub fn frozen_stakes(&self) -> Result<Vec<Stake>, StakingError> {
        Ok(self.frozen_ledger.iterate(LedgerMode::Finalizing)?)
    }

    /// Point query over committed state, JSON-encoded.
    ///
    /// Paths: `"delegatee"` returns the delegatee at `addr`; `"stakes"`
    /// returns every active stake owned by `addr`. `version` selects a
    /// historical committed version, defaulting to the latest.
    pub fn query(
        &self,
        path: &str,
        addr: &Address,
        version: Option<u64>,
    ) -> Result<serde_json::Value, StakingError> {
        let version = version.unwrap_or_else(|| self.delegatee_ledger.version());
        let view = self.delegatee_ledger.immutable_at(version)?;
        match path {
            "delegatee" => {
                let delegatee = view
                    .get(&LedgerKey::from(*addr))
                    .map_err(not_found_delegatee)?;
                serde_json::to_value(&delegatee)
                    .map_err(|e| StakingError::Ledger(LedgerError::Codec(e.to_string())))
            }
            "stakes" => {
                let stakes: Vec<Stake> = view
                    .iterate()
                    .iter()
                    .flat_map(|d| d.stakes_of(addr))
                    .cloned()
                    .collect();
                serde_json::to_value(&stakes)
                    .map_err(|e| StakingError::Ledger(LedgerError::Codec(e.to_string())))
            }
            other => Err(StakingError::UnknownQueryPath(other.to_string())),
        }
    }
}

fn not_found_delegatee(e: LedgerError) -> StakingError {
    match e {
        LedgerError::NotFoundResult => StakingError::NotFoundDelegatee,
        other => StakingError::Ledger(other),
    }
}

/// Pick the active validator set from the given delegatees: descending
/// power, ties broken by stake count then address, top `max` with power
/// above zero, result sorted by address for deterministic diffing.
pub fn compute_validator_set(delegatees: &[Delegatee], max: usize) -> Vec<ValidatorPower> {
    let mut ranked: Vec<&Delegatee> =
        delegatees.iter().filter(|d| d.total_power > 0).collect();
    ranked.sort_by(|a, b| {
        b.total_power
            .cmp(&a.total_power)
            .then_with(|| b.stake_count().cmp(&a.stake_count()))
            .then_with(|| a.addr.cmp(&b.addr))
    });
    let mut set: Vec<ValidatorPower> = ranked
        .into_iter()
        .take(max)
        .map(|d| ValidatorPower {
            addr: d.addr,
            power: d.total_power,
        })
        .collect();
    set.sort_by(|a, b| a.addr.cmp(&b.addr));
    set
}

/// Minimal change-set turning `old` into `new`; both inputs sorted by
/// address. A power of 0 marks removal.
pub fn validator_updates(
    old: &[ValidatorPower],
    new: &[ValidatorPower],
) -> Vec<ValidatorPower> {
    let mut updates = Vec::new();
    let (mut i, mut j) = (0usize, 0usize);
    while i < old.len() && j < new.len() {
        match old[i].addr.cmp(&new[j].addr) {
            std::cmp::Ordering::Less => {
                updates.push(ValidatorPower {
                    addr: old[i].addr,
                    power: 0,
                });
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                updates.push(new[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                if old[i].power != new[j].power {
                    updates.push(new[j]);
                }
                i += 1;
                j += 1;
            }
        }
    }
    for stale in &old[i..] {
        updates.push(ValidatorPower {
            addr: stale.addr,
            power: 0,
        });
    }
    updates.extend_from_slice(&new[j..]);
    updates
}
