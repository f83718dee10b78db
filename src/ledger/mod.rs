//! Versioned, two-phase key/value ledgers
//!
//! All consensus-critical staking state lives in [`Ledger`] instances: a
//! typed view over a [`tree::VersionedTree`] with a speculative working
//! set for validate-only reads and a finality working set for state that
//! will be sealed at the next commit.

pub mod ledger;
pub mod tree;

pub use ledger::{ImmutableLedger, Ledger, LedgerItem, LedgerMode};
pub use tree::VersionedTree;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Address, Hash};

/// Ledger failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The key is absent, or was removed earlier in this block
    #[error("no result found for the given key")]
    NotFoundResult,

    #[error("unknown ledger version {0}")]
    UnknownVersion(u64),

    #[error("ledger codec error: {0}")]
    Codec(String),

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Fixed-size key addressing one ledger entry.
///
/// Derived verbatim from an address (delegatee ledger) or a transaction
/// hash (frozen-stake ledger).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey(pub [u8; 32]);

impl LedgerKey {
    /// Create from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        LedgerKey(bytes)
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<Address> for LedgerKey {
    fn from(addr: Address) -> Self {
        LedgerKey(addr.0)
    }
}

impl From<Hash> for LedgerKey {
    fn from(hash: Hash) -> Self {
        LedgerKey(hash.0)
    }
}

impl fmt::Debug for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LedgerKey({})", &self.to_hex()[..8])
    }
}
