//! Cryptographic identity types for the staking core
//!
//! Signature schemes live in the node's wire layer; the staking core only
//! needs stable 32-byte identities (addresses, transaction hashes) and the
//! SHA-256 digests that anchor the versioned ledger's state roots.

pub mod address;
pub mod hash;

pub use address::Address;
pub use hash::Hash;
