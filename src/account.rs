//! Account service boundary
//!
//! Balance bookkeeping is owned by the node's account subsystem; the
//! staking core only needs the narrow interface used at unfreeze time to
//! return matured stakes and pay out accumulated rewards. A thread-safe
//! in-memory implementation is provided for tests and stand-alone use.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::types::Amount;
use crate::crypto::Address;

/// Account operation failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccountError {
    #[error("account {0} not found")]
    NotFound(Address),

    #[error("insufficient funds: balance {balance}, needed {needed}")]
    InsufficientFunds { balance: Amount, needed: Amount },
}

/// Injected account service
pub trait AccountKeeper: Send + Sync {
    /// Look up an account's balance, creating a zero-balance account if
    /// it does not exist yet
    fn find_or_new(&self, addr: &Address) -> Amount;

    /// Look up an account's balance
    fn find(&self, addr: &Address) -> Option<Amount>;

    /// Move `amount` between two accounts
    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), AccountError>;

    /// Mint `amount` to an account as a protocol reward
    fn reward(&self, addr: &Address, amount: Amount) -> Result<(), AccountError>;
}

/// In-memory account keeper
pub struct MemoryAccountKeeper {
    balances: RwLock<HashMap<Address, Amount>>,
}

impl MemoryAccountKeeper {
    pub fn new() -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
        }
    }

    /// Seed an account balance directly, for genesis and tests
    pub fn deposit(&self, addr: &Address, amount: Amount) {
        let mut balances = self.balances.write();
        let balance = balances.entry(*addr).or_insert(0);
        *balance = balance.saturating_add(amount);
    }
}

impl Default for MemoryAccountKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountKeeper for MemoryAccountKeeper {
    fn find_or_new(&self, addr: &Address) -> Amount {
        *self.balances.write().entry(*addr).or_insert(0)
    }

    fn find(&self, addr: &Address) -> Option<Amount> {
        self.balances.read().get(addr).copied()
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<(), AccountError> {
        let mut balances = self.balances.write();
        let from_balance = balances.get(from).copied().unwrap_or(0);
        if from_balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: from_balance,
                needed: amount,
            });
        }
        balances.insert(*from, from_balance - amount);
        let to_balance = balances.entry(*to).or_insert(0);
        *to_balance = to_balance.saturating_add(amount);
        Ok(())
    }

    fn reward(&self, addr: &Address, amount: Amount) -> Result<(), AccountError> {
        let mut balances = self.balances.write();
        let balance = balances.entry(*addr).or_insert(0);
        *balance = balance.saturating_add(amount);
        Ok(())
    }
}
