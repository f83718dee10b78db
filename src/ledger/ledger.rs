//! Typed two-phase ledger over the versioned tree
//!
//! A [`Ledger`] exposes the same operations in two view modes:
//!
//! - [`LedgerMode::Speculative`] — read-through cache used for
//!   validate-only checks. Writes are staged in the cache and thrown away
//!   wholesale at commit; nothing speculative ever reaches the tree.
//! - [`LedgerMode::Finalizing`] — the state the current block will seal.
//!   Staged updates and a removed-key set are kept separately so that a
//!   key deleted and re-created within one block resolves to present:
//!   at commit, removals hit the tree strictly before updates.
//!
//! Both views share one underlying tree and one commit path. Each ledger
//! instance carries its own lock; callers may read concurrently while a
//! single writer drives the block lifecycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::tree::VersionedTree;
use super::{LedgerError, LedgerKey};
use crate::crypto::Hash;

/// A value that can live in a [`Ledger`]
pub trait LedgerItem: Clone + Serialize + DeserializeOwned {
    /// The fixed 32-byte key this item is stored under
    fn ledger_key(&self) -> LedgerKey;
}

/// Which working set an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// Validate-only view; staged state is discarded at commit
    Speculative,
    /// The view that becomes canonical at the next commit
    Finalizing,
}

struct Inner<T> {
    tree: VersionedTree,
    /// Speculative read cache and staging area, discarded at commit
    spec_cache: HashMap<LedgerKey, T>,
    /// Finality read-through cache
    fin_cache: HashMap<LedgerKey, T>,
    /// Updates staged for the next commit, in key order
    fin_updated: BTreeMap<LedgerKey, T>,
    /// Keys removed in this block, applied before updates at commit
    fin_removed: BTreeSet<LedgerKey>,
}

/// Versioned ledger of one item type
pub struct Ledger<T: LedgerItem> {
    name: &'static str,
    inner: RwLock<Inner<T>>,
}

impl<T: LedgerItem> Ledger<T> {
    /// In-memory ledger
    pub fn new_memory(name: &'static str) -> Self {
        Self {
            name,
            inner: RwLock::new(Inner {
                tree: VersionedTree::new_memory(),
                spec_cache: HashMap::new(),
                fin_cache: HashMap::new(),
                fin_updated: BTreeMap::new(),
                fin_removed: BTreeSet::new(),
            }),
        }
    }

    /// Persistent ledger backed by a sled tree
    pub fn new_persistent(name: &'static str, db: sled::Tree) -> Result<Self, LedgerError> {
        Ok(Self {
            name,
            inner: RwLock::new(Inner {
                tree: VersionedTree::new_persistent(db)?,
                spec_cache: HashMap::new(),
                fin_cache: HashMap::new(),
                fin_updated: BTreeMap::new(),
                fin_removed: BTreeSet::new(),
            }),
        })
    }

    /// Read one item through the selected working set.
    ///
    /// Fails with `NotFoundResult` if the key is absent, or — in the
    /// finality view — if it was removed earlier in this block.
    pub fn get(&self, mode: LedgerMode, key: &LedgerKey) -> Result<T, LedgerError> {
        let mut inner = self.inner.write();
        match mode {
            LedgerMode::Finalizing => {
                if let Some(item) = inner.fin_updated.get(key) {
                    return Ok(item.clone());
                }
                if inner.fin_removed.contains(key) {
                    return Err(LedgerError::NotFoundResult);
                }
                if let Some(item) = inner.fin_cache.get(key) {
                    return Ok(item.clone());
                }
                let item: T = read_through(&inner.tree, key)?;
                inner.fin_cache.insert(*key, item.clone());
                Ok(item)
            }
            LedgerMode::Speculative => {
                if let Some(item) = inner.spec_cache.get(key) {
                    return Ok(item.clone());
                }
                let item: T = read_through(&inner.tree, key)?;
                inner.spec_cache.insert(*key, item.clone());
                Ok(item)
            }
        }
    }

    /// Stage an item for the selected working set. Pure staging — the
    /// tree is untouched until commit.
    pub fn set(&self, mode: LedgerMode, item: T) {
        let key = item.ledger_key();
        let mut inner = self.inner.write();
        match mode {
            LedgerMode::Finalizing => {
                inner.fin_updated.insert(key, item);
            }
            LedgerMode::Speculative => {
                inner.spec_cache.insert(key, item);
            }
        }
    }

    /// Stage removal of an existing key and return the removed item.
    /// Fails with `NotFoundResult` on a non-existent key.
    pub fn del(&self, mode: LedgerMode, key: &LedgerKey) -> Result<T, LedgerError> {
        let mut inner = self.inner.write();
        match mode {
            LedgerMode::Finalizing => {
                let item = if let Some(staged) = inner.fin_updated.remove(key) {
                    staged
                } else if inner.fin_removed.contains(key) {
                    return Err(LedgerError::NotFoundResult);
                } else if let Some(cached) = inner.fin_cache.get(key) {
                    cached.clone()
                } else {
                    read_through(&inner.tree, key)?
                };
                inner.fin_removed.insert(*key);
                inner.fin_cache.remove(key);
                Ok(item)
            }
            LedgerMode::Speculative => {
                // advisory only: the speculative set never commits
                match inner.spec_cache.remove(key) {
                    Some(item) => Ok(item),
                    None => read_through(&inner.tree, key),
                }
            }
        }
    }

    /// Iterate the fully committed tree, in key order
    pub fn iterate_committed(&self) -> Result<Vec<T>, LedgerError> {
        let inner = self.inner.read();
        inner
            .tree
            .entries()
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    /// Iterate the selected working set merged over the committed tree,
    /// in key order
    pub fn iterate(&self, mode: LedgerMode) -> Result<Vec<T>, LedgerError> {
        let inner = self.inner.read();
        let mut merged: BTreeMap<LedgerKey, T> = BTreeMap::new();
        for (key, bytes) in inner.tree.entries() {
            merged.insert(key, decode(&bytes)?);
        }
        match mode {
            LedgerMode::Finalizing => {
                // same order as commit: removals first, then updates
                for key in &inner.fin_removed {
                    merged.remove(key);
                }
                for (key, item) in &inner.fin_updated {
                    merged.insert(*key, item.clone());
                }
            }
            LedgerMode::Speculative => {
                for (key, item) in &inner.spec_cache {
                    merged.insert(*key, item.clone());
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Seal the finality working set into a new tree version.
    ///
    /// Removals apply strictly before updates; updates apply in sorted
    /// key order. Both working sets are cleared. Returns the new root
    /// hash and version.
    pub fn commit(&self) -> Result<(Hash, u64), LedgerError> {
        let mut inner = self.inner.write();

        let removals: Vec<LedgerKey> = inner.fin_removed.iter().copied().collect();
        let mut updates: Vec<(LedgerKey, Vec<u8>)> = Vec::with_capacity(inner.fin_updated.len());
        for (key, item) in &inner.fin_updated {
            updates.push((*key, encode(item)?));
        }

        let (root_hash, version) = inner.tree.commit(&removals, &updates)?;

        inner.spec_cache.clear();
        inner.fin_cache.clear();
        inner.fin_updated.clear();
        inner.fin_removed.clear();

        debug!(
            ledger = self.name,
            version,
            root = %root_hash,
            removed = removals.len(),
            updated = updates.len(),
            "ledger committed"
        );
        Ok((root_hash, version))
    }

    /// Open a read-only view pinned to a committed version
    pub fn immutable_at(&self, version: u64) -> Result<ImmutableLedger<T>, LedgerError> {
        let inner = self.inner.read();
        let root_hash = inner.tree.root_at(version)?;
        let mut items = BTreeMap::new();
        for (key, bytes) in inner.tree.entries_at(version)? {
            items.insert(key, decode::<T>(&bytes)?);
        }
        Ok(ImmutableLedger {
            version,
            root_hash,
            items,
        })
    }

    /// Latest committed version
    pub fn version(&self) -> u64 {
        self.inner.read().tree.version()
    }

    /// Root hash of the latest committed version
    pub fn root_hash(&self) -> Hash {
        self.inner.read().tree.root_hash()
    }

    /// Whether the latest committed version holds no entries
    pub fn is_committed_empty(&self) -> bool {
        self.inner.read().tree.is_empty()
    }

    /// Name this ledger was opened under
    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn read_through<T: LedgerItem>(tree: &VersionedTree, key: &LedgerKey) -> Result<T, LedgerError> {
    match tree.get(key) {
        Some(bytes) => decode(&bytes),
        None => Err(LedgerError::NotFoundResult),
    }
}

fn encode<T: Serialize>(item: &T) -> Result<Vec<u8>, LedgerError> {
    bincode::serialize(item).map_err(|e| LedgerError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, LedgerError> {
    bincode::deserialize(bytes).map_err(|e| LedgerError::Codec(e.to_string()))
}

/// Read-only ledger view pinned to one committed version.
///
/// The contents are materialized at open time; concurrent writes to the
/// live ledger cannot affect it.
pub struct ImmutableLedger<T> {
    version: u64,
    root_hash: Hash,
    items: BTreeMap<LedgerKey, T>,
}

impl<T: Clone> ImmutableLedger<T> {
    /// Version this view is pinned to
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Root hash of the pinned version
    pub fn root_hash(&self) -> Hash {
        self.root_hash
    }

    /// Read one item
    pub fn get(&self, key: &LedgerKey) -> Result<T, LedgerError> {
        self.items
            .get(key)
            .cloned()
            .ok_or(LedgerError::NotFoundResult)
    }

    /// All items in key order
    pub fn iterate(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Entry {
        id: [u8; 32],
        label: String,
        weight: u64,
    }

    impl LedgerItem for Entry {
        fn ledger_key(&self) -> LedgerKey {
            LedgerKey::new(self.id)
        }
    }

    fn entry(seed: u8, label: &str, weight: u64) -> Entry {
        Entry {
            id: [seed; 32],
            label: label.to_string(),
            weight,
        }
    }

    fn key(seed: u8) -> LedgerKey {
        LedgerKey::new([seed; 32])
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let ledger: Ledger<Entry> = Ledger::new_memory("test");
        for mode in [LedgerMode::Speculative, LedgerMode::Finalizing] {
            assert!(matches!(
                ledger.get(mode, &key(1)),
                Err(LedgerError::NotFoundResult)
            ));
        }
    }

    #[test]
    fn test_speculative_writes_discarded_at_commit() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Speculative, entry(1, "spec", 10));
        ledger.set(LedgerMode::Finalizing, entry(2, "fin", 20));
        ledger.commit().unwrap();

        assert!(ledger.get(LedgerMode::Finalizing, &key(1)).is_err());
        let kept = ledger.get(LedgerMode::Finalizing, &key(2)).unwrap();
        assert_eq!(kept.label, "fin");
    }

    #[test]
    fn test_del_returns_removed_item() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Finalizing, entry(1, "a", 1));
        ledger.commit().unwrap();

        let removed = ledger.del(LedgerMode::Finalizing, &key(1)).unwrap();
        assert_eq!(removed.label, "a");
        // removed key reads as absent for the rest of the block
        assert!(matches!(
            ledger.get(LedgerMode::Finalizing, &key(1)),
            Err(LedgerError::NotFoundResult)
        ));
        // and double-delete is an error
        assert!(ledger.del(LedgerMode::Finalizing, &key(1)).is_err());
    }

    #[test]
    fn test_delete_then_recreate_in_same_block() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Finalizing, entry(1, "old", 1));
        ledger.commit().unwrap();

        ledger.del(LedgerMode::Finalizing, &key(1)).unwrap();
        ledger.set(LedgerMode::Finalizing, entry(1, "new", 2));
        let live = ledger.get(LedgerMode::Finalizing, &key(1)).unwrap();
        assert_eq!(live.label, "new");

        ledger.commit().unwrap();
        let committed = ledger.get(LedgerMode::Finalizing, &key(1)).unwrap();
        assert_eq!(committed.label, "new");
    }

    #[test]
    fn test_iterate_merges_staged_state() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Finalizing, entry(1, "a", 1));
        ledger.set(LedgerMode::Finalizing, entry(2, "b", 2));
        ledger.commit().unwrap();

        ledger.del(LedgerMode::Finalizing, &key(1)).unwrap();
        ledger.set(LedgerMode::Finalizing, entry(3, "c", 3));

        let labels: Vec<String> = ledger
            .iterate(LedgerMode::Finalizing)
            .unwrap()
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(labels, vec!["b", "c"]);

        // committed view unchanged until commit
        let committed: Vec<String> = ledger
            .iterate_committed()
            .unwrap()
            .into_iter()
            .map(|e| e.label)
            .collect();
        assert_eq!(committed, vec!["a", "b"]);
    }

    #[test]
    fn test_commit_clears_both_working_sets() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Speculative, entry(1, "spec", 1));
        ledger.set(LedgerMode::Finalizing, entry(2, "fin", 2));
        let (root1, v1) = ledger.commit().unwrap();
        assert_eq!(v1, 1);
        assert!(!root1.is_zero());

        // nothing staged: empty commit keeps content, bumps version
        let (root2, v2) = ledger.commit().unwrap();
        assert_eq!(v2, 2);
        assert_eq!(root1, root2);
    }

    #[test]
    fn test_immutable_view_is_pinned() {
        let ledger = Ledger::new_memory("test");
        ledger.set(LedgerMode::Finalizing, entry(1, "v1", 1));
        ledger.commit().unwrap();
        ledger.set(LedgerMode::Finalizing, entry(1, "v2", 2));
        ledger.commit().unwrap();

        let pinned = ledger.immutable_at(1).unwrap();
        assert_eq!(pinned.version(), 1);
        assert_eq!(pinned.get(&key(1)).unwrap().label, "v1");

        // live ledger has moved on
        assert_eq!(
            ledger.get(LedgerMode::Finalizing, &key(1)).unwrap().label,
            "v2"
        );
    }

    #[test]
    fn test_item_roundtrip_through_commit() {
        let ledger = Ledger::new_memory("test");
        let original = entry(9, "roundtrip", 12345);
        ledger.set(LedgerMode::Finalizing, original.clone());
        ledger.commit().unwrap();

        let reloaded = ledger.get(LedgerMode::Speculative, &key(9)).unwrap();
        assert_eq!(original, reloaded);
    }
}
