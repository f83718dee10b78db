//! Staking transactions
//!
//! The controller consumes exactly two transaction kinds: `Staking` locks
//! an amount with a delegatee, `Unstaking` releases a previously created
//! stake by its original transaction hash. The kinds form a closed sum
//! type; an unrecognized wire tag surfaces as `TrxError::UnknownTrxType`
//! at decode time, never as a silent fallthrough.

use serde::{Deserialize, Serialize};

use crate::core::types::Amount;
use crate::crypto::{Address, Hash};

/// Transaction identity, assigned by the wire layer
pub type TrxHash = Hash;

/// Wire tag for staking transactions
pub const TRX_KIND_STAKING: u8 = 1;
/// Wire tag for unstaking transactions
pub const TRX_KIND_UNSTAKING: u8 = 2;

/// Transaction decode errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrxError {
    #[error("unknown transaction type tag {0}")]
    UnknownTrxType(u8),

    #[error("transaction codec error: {0}")]
    Codec(String),
}

/// The operation a staking transaction performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrxPayload {
    /// Lock `amount` with the delegatee named in `to`
    Staking { amount: Amount },
    /// Release the stake created by `trx_hash` from the delegatee in `to`
    Unstaking { trx_hash: TrxHash },
}

impl TrxPayload {
    /// Wire tag for this payload kind
    pub fn kind(&self) -> u8 {
        match self {
            TrxPayload::Staking { .. } => TRX_KIND_STAKING,
            TrxPayload::Unstaking { .. } => TRX_KIND_UNSTAKING,
        }
    }
}

/// A staking transaction as handed to the controller.
///
/// Signature verification happens before dispatch; `pub_key` is the
/// sender key recovered by the signature layer and is only consulted when
/// a self-stake creates a new delegatee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trx {
    /// Unique transaction hash; becomes the stake's identity
    pub hash: TrxHash,
    /// Delegator (sender) address
    pub from: Address,
    /// Delegatee (recipient) address
    pub to: Address,
    /// Sender public key, recovered by the signature layer
    pub pub_key: Vec<u8>,
    /// The staking operation
    pub payload: TrxPayload,
}

/// Flat wire form with an explicit kind tag
#[derive(Serialize, Deserialize)]
struct TrxWire {
    kind: u8,
    hash: TrxHash,
    from: Address,
    to: Address,
    pub_key: Vec<u8>,
    amount: Amount,
    target: TrxHash,
}

impl Trx {
    /// Build a staking transaction
    pub fn staking(hash: TrxHash, from: Address, to: Address, pub_key: Vec<u8>, amount: Amount) -> Self {
        Self {
            hash,
            from,
            to,
            pub_key,
            payload: TrxPayload::Staking { amount },
        }
    }

    /// Build an unstaking transaction referencing the original stake
    pub fn unstaking(hash: TrxHash, from: Address, to: Address, target: TrxHash) -> Self {
        Self {
            hash,
            from,
            to,
            pub_key: Vec::new(),
            payload: TrxPayload::Unstaking { trx_hash: target },
        }
    }

    /// Encode to the tagged wire form
    pub fn encode(&self) -> Result<Vec<u8>, TrxError> {
        let (amount, target) = match &self.payload {
            TrxPayload::Staking { amount } => (*amount, TrxHash::zero()),
            TrxPayload::Unstaking { trx_hash } => (0, *trx_hash),
        };
        let wire = TrxWire {
            kind: self.payload.kind(),
            hash: self.hash,
            from: self.from,
            to: self.to,
            pub_key: self.pub_key.clone(),
            amount,
            target,
        };
        bincode::serialize(&wire).map_err(|e| TrxError::Codec(e.to_string()))
    }

    /// Decode from the tagged wire form; rejects unrecognized kind tags
    pub fn decode(bytes: &[u8]) -> Result<Self, TrxError> {
        let wire: TrxWire =
            bincode::deserialize(bytes).map_err(|e| TrxError::Codec(e.to_string()))?;
        let payload = match wire.kind {
            TRX_KIND_STAKING => TrxPayload::Staking { amount: wire.amount },
            TRX_KIND_UNSTAKING => TrxPayload::Unstaking { trx_hash: wire.target },
            other => return Err(TrxError::UnknownTrxType(other)),
        };
        Ok(Self {
            hash: wire.hash,
            from: wire.from,
            to: wire.to,
            pub_key: wire.pub_key,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address::new([seed; 32])
    }

    #[test]
    fn test_staking_wire_roundtrip() {
        let trx = Trx::staking(
            Hash::hash(b"tx-1"),
            addr(1),
            addr(1),
            b"validator pub key".to_vec(),
            5_000_000,
        );
        let decoded = Trx::decode(&trx.encode().unwrap()).unwrap();
        assert_eq!(trx, decoded);
    }

    #[test]
    fn test_unstaking_wire_roundtrip() {
        let trx = Trx::unstaking(Hash::hash(b"tx-2"), addr(1), addr(2), Hash::hash(b"tx-1"));
        let decoded = Trx::decode(&trx.encode().unwrap()).unwrap();
        assert_eq!(trx, decoded);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let trx = Trx::staking(Hash::hash(b"tx-3"), addr(1), addr(1), vec![], 100);
        let mut bytes = trx.encode().unwrap();
        // kind tag is the first wire byte
        bytes[0] = 0x7f;
        match Trx::decode(&bytes) {
            Err(TrxError::UnknownTrxType(0x7f)) => {}
            other => panic!("expected UnknownTrxType, got {:?}", other),
        }
    }
}
