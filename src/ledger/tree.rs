//! Versioned balanced merkle tree
//!
//! Storage backbone of the ledgers: an AVL search tree whose nodes are
//! immutable and shared between versions through `Arc`. Every commit
//! produces exactly one new version and one root hash; earlier versions
//! stay readable and are never touched by later writes.
//!
//! Node digest = SHA-256 over (height, key, value digest, child digests),
//! so the root hash commits to the full key/value content and the tree
//! shape. Replicas applying the same ordered commit batches arrive at the
//! same shape and therefore the same root.
//!
//! Persistence follows the account-store pattern: an optional `sled::Tree`
//! receives a bincode snapshot of the committed entries per version, and
//! `new_persistent` reloads the latest one on startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{LedgerError, LedgerKey};
use crate::crypto::Hash;

type NodeRef = Option<Arc<Node>>;

struct Node {
    key: LedgerKey,
    value: Vec<u8>,
    left: NodeRef,
    right: NodeRef,
    height: u32,
    hash: Hash,
}

fn height_of(node: &NodeRef) -> u32 {
    node.as_ref().map(|n| n.height).unwrap_or(0)
}

fn hash_of(node: &NodeRef) -> Hash {
    node.as_ref().map(|n| n.hash).unwrap_or_else(Hash::zero)
}

impl Node {
    /// Build a node over the given children, computing height and digest
    fn build(key: LedgerKey, value: Vec<u8>, left: NodeRef, right: NodeRef) -> Arc<Node> {
        let height = 1 + height_of(&left).max(height_of(&right));
        let value_hash = Hash::hash(&value);
        let hash = Hash::hash_multiple(&[
            &height.to_le_bytes(),
            key.as_bytes(),
            value_hash.as_bytes(),
            hash_of(&left).as_bytes(),
            hash_of(&right).as_bytes(),
        ]);
        Arc::new(Node {
            key,
            value,
            left,
            right,
            height,
            hash,
        })
    }

    fn leaf(key: LedgerKey, value: Vec<u8>) -> Arc<Node> {
        Node::build(key, value, None, None)
    }
}

/// Build a node and restore the AVL invariant at this level.
///
/// Invoked bottom-up after every insert/remove step, so the imbalance
/// here is at most 2 and one single or double rotation restores it.
fn balance(key: LedgerKey, value: Vec<u8>, left: NodeRef, right: NodeRef) -> Arc<Node> {
    let lh = height_of(&left) as i64;
    let rh = height_of(&right) as i64;

    if lh - rh > 1 {
        // a left-heavy node of height >= 2 always has a left child
        if let Some(l) = left.clone() {
            if height_of(&l.left) >= height_of(&l.right) {
                // single right rotation
                let new_right = Node::build(key, value, l.right.clone(), right);
                return Node::build(l.key, l.value.clone(), l.left.clone(), Some(new_right));
            }
            if let Some(lr) = l.right.clone() {
                // left-right double rotation
                let new_left = Node::build(l.key, l.value.clone(), l.left.clone(), lr.left.clone());
                let new_right = Node::build(key, value, lr.right.clone(), right);
                return Node::build(lr.key, lr.value.clone(), Some(new_left), Some(new_right));
            }
        }
    } else if rh - lh > 1 {
        if let Some(r) = right.clone() {
            if height_of(&r.right) >= height_of(&r.left) {
                // single left rotation
                let new_left = Node::build(key, value, left, r.left.clone());
                return Node::build(r.key, r.value.clone(), Some(new_left), r.right.clone());
            }
            if let Some(rl) = r.left.clone() {
                // right-left double rotation
                let new_left = Node::build(key, value, left, rl.left.clone());
                let new_right =
                    Node::build(r.key, r.value.clone(), rl.right.clone(), r.right.clone());
                return Node::build(rl.key, rl.value.clone(), Some(new_left), Some(new_right));
            }
        }
    }
    Node::build(key, value, left, right)
}

fn insert(node: &NodeRef, key: LedgerKey, value: Vec<u8>) -> Arc<Node> {
    match node {
        None => Node::leaf(key, value),
        Some(n) => match key.cmp(&n.key) {
            std::cmp::Ordering::Equal => {
                Node::build(key, value, n.left.clone(), n.right.clone())
            }
            std::cmp::Ordering::Less => {
                let new_left = insert(&n.left, key, value);
                balance(n.key, n.value.clone(), Some(new_left), n.right.clone())
            }
            std::cmp::Ordering::Greater => {
                let new_right = insert(&n.right, key, value);
                balance(n.key, n.value.clone(), n.left.clone(), Some(new_right))
            }
        },
    }
}

/// Detach the smallest entry of a non-empty subtree
fn take_min(node: &Arc<Node>) -> (NodeRef, (LedgerKey, Vec<u8>)) {
    match &node.left {
        None => (node.right.clone(), (node.key, node.value.clone())),
        Some(l) => {
            let (rest, min) = take_min(l);
            (
                Some(balance(node.key, node.value.clone(), rest, node.right.clone())),
                min,
            )
        }
    }
}

/// Join two subtrees where every key in `left` is below every key in `right`
fn merge(left: NodeRef, right: NodeRef) -> NodeRef {
    match (left, right) {
        (None, r) => r,
        (l, None) => l,
        (l, Some(r)) => {
            let (rest, (key, value)) = take_min(&r);
            Some(balance(key, value, l, rest))
        }
    }
}

/// Remove `key`, returning the new subtree and the removed value
fn remove(node: &NodeRef, key: &LedgerKey) -> Option<(NodeRef, Vec<u8>)> {
    let n = node.as_ref()?;
    match key.cmp(&n.key) {
        std::cmp::Ordering::Equal => {
            let merged = merge(n.left.clone(), n.right.clone());
            Some((merged, n.value.clone()))
        }
        std::cmp::Ordering::Less => {
            let (new_left, removed) = remove(&n.left, key)?;
            Some((
                Some(balance(n.key, n.value.clone(), new_left, n.right.clone())),
                removed,
            ))
        }
        std::cmp::Ordering::Greater => {
            let (new_right, removed) = remove(&n.right, key)?;
            Some((
                Some(balance(n.key, n.value.clone(), n.left.clone(), new_right)),
                removed,
            ))
        }
    }
}

fn get<'a>(node: &'a NodeRef, key: &LedgerKey) -> Option<&'a [u8]> {
    let mut current = node;
    while let Some(n) = current {
        match key.cmp(&n.key) {
            std::cmp::Ordering::Equal => return Some(&n.value),
            std::cmp::Ordering::Less => current = &n.left,
            std::cmp::Ordering::Greater => current = &n.right,
        }
    }
    None
}

fn collect(node: &NodeRef, out: &mut Vec<(LedgerKey, Vec<u8>)>) {
    if let Some(n) = node {
        collect(&n.left, out);
        out.push((n.key, n.value.clone()));
        collect(&n.right, out);
    }
}

/// On-disk record of one committed version
#[derive(Serialize, Deserialize)]
struct VersionSnapshot {
    version: u64,
    root_hash: Hash,
    entries: Vec<(LedgerKey, Vec<u8>)>,
}

const LATEST_KEY: &[u8] = b"latest";

fn snapshot_key(version: u64) -> Vec<u8> {
    let mut key = b"v:".to_vec();
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Versioned key/value tree with per-version root hashes.
///
/// Version 0 is the empty pre-genesis state; the first commit produces
/// version 1. Locking is the owning ledger's responsibility — this type
/// takes `&mut self` for commits and is wrapped in that ledger's lock.
pub struct VersionedTree {
    versions: BTreeMap<u64, NodeRef>,
    latest: u64,
    db: Option<sled::Tree>,
}

impl VersionedTree {
    /// In-memory tree starting from the empty version 0
    pub fn new_memory() -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(0, None);
        Self {
            versions,
            latest: 0,
            db: None,
        }
    }

    /// Persistent tree; reloads the latest committed version from `db`
    pub fn new_persistent(db: sled::Tree) -> Result<Self, LedgerError> {
        let mut tree = Self::new_memory();

        let latest = match db
            .get(LATEST_KEY)
            .map_err(|e| LedgerError::Storage(e.to_string()))?
        {
            Some(raw) => {
                let mut buf = [0u8; 8];
                if raw.len() != 8 {
                    return Err(LedgerError::Storage("malformed latest-version marker".into()));
                }
                buf.copy_from_slice(&raw);
                u64::from_be_bytes(buf)
            }
            None => {
                tree.db = Some(db);
                return Ok(tree);
            }
        };

        let snapshot = read_snapshot(&db, latest)?;
        let mut root: NodeRef = None;
        for (key, value) in snapshot.entries {
            root = Some(insert(&root, key, value));
        }
        if hash_of(&root) != snapshot.root_hash {
            return Err(LedgerError::Storage(format!(
                "root hash mismatch reloading version {}",
                latest
            )));
        }

        tree.versions.insert(latest, root);
        tree.latest = latest;
        tree.db = Some(db);
        Ok(tree)
    }

    /// Latest committed version number
    pub fn version(&self) -> u64 {
        self.latest
    }

    /// Root hash of the latest committed version (zero when empty)
    pub fn root_hash(&self) -> Hash {
        self.versions
            .get(&self.latest)
            .map(hash_of)
            .unwrap_or_else(Hash::zero)
    }

    /// Whether the latest committed version holds no entries
    pub fn is_empty(&self) -> bool {
        matches!(self.versions.get(&self.latest), None | Some(None))
    }

    /// Read a key from the latest committed version
    pub fn get(&self, key: &LedgerKey) -> Option<Vec<u8>> {
        let root = self.versions.get(&self.latest)?;
        get(root, key).map(|v| v.to_vec())
    }

    /// All entries of the latest committed version, in key order
    pub fn entries(&self) -> Vec<(LedgerKey, Vec<u8>)> {
        let mut out = Vec::new();
        if let Some(root) = self.versions.get(&self.latest) {
            collect(root, &mut out);
        }
        out
    }

    /// All entries of a historical version, in key order
    pub fn entries_at(&self, version: u64) -> Result<Vec<(LedgerKey, Vec<u8>)>, LedgerError> {
        if let Some(root) = self.versions.get(&version) {
            let mut out = Vec::new();
            collect(root, &mut out);
            return Ok(out);
        }
        match &self.db {
            Some(db) => Ok(read_snapshot(db, version)?.entries),
            None => Err(LedgerError::UnknownVersion(version)),
        }
    }

    /// Root hash of a historical version
    pub fn root_at(&self, version: u64) -> Result<Hash, LedgerError> {
        if let Some(root) = self.versions.get(&version) {
            return Ok(hash_of(root));
        }
        match &self.db {
            Some(db) => Ok(read_snapshot(db, version)?.root_hash),
            None => Err(LedgerError::UnknownVersion(version)),
        }
    }

    /// Apply one block's changes and seal a new version.
    ///
    /// Removals are applied strictly before updates so that a key deleted
    /// and re-created within the same block ends up present. Callers pass
    /// both lists in sorted key order; the resulting root is then
    /// independent of any in-memory map iteration order.
    pub fn commit(
        &mut self,
        removals: &[LedgerKey],
        updates: &[(LedgerKey, Vec<u8>)],
    ) -> Result<(Hash, u64), LedgerError> {
        let mut root = self.versions.get(&self.latest).cloned().unwrap_or(None);

        for key in removals {
            // absent keys were created and deleted within this block
            if let Some((new_root, _)) = remove(&root, key) {
                root = new_root;
            }
        }
        for (key, value) in updates {
            root = Some(insert(&root, *key, value.clone()));
        }

        let version = self.latest + 1;
        let root_hash = hash_of(&root);

        if let Some(db) = &self.db {
            let mut entries = Vec::new();
            collect(&root, &mut entries);
            let snapshot = VersionSnapshot {
                version,
                root_hash,
                entries,
            };
            let bytes =
                bincode::serialize(&snapshot).map_err(|e| LedgerError::Codec(e.to_string()))?;
            db.insert(snapshot_key(version), bytes)
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
            db.insert(LATEST_KEY, version.to_be_bytes().to_vec())
                .map_err(|e| LedgerError::Storage(e.to_string()))?;
        }

        self.versions.insert(version, root);
        self.latest = version;
        debug!(version, root = %root_hash, "tree version sealed");
        Ok((root_hash, version))
    }

    #[cfg(test)]
    fn height(&self) -> u32 {
        self.versions
            .get(&self.latest)
            .map(height_of)
            .unwrap_or(0)
    }
}

fn read_snapshot(db: &sled::Tree, version: u64) -> Result<VersionSnapshot, LedgerError> {
    let raw = db
        .get(snapshot_key(version))
        .map_err(|e| LedgerError::Storage(e.to_string()))?
        .ok_or(LedgerError::UnknownVersion(version))?;
    bincode::deserialize(&raw).map_err(|e| LedgerError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> LedgerKey {
        LedgerKey::new([seed; 32])
    }

    fn sorted(mut entries: Vec<(LedgerKey, Vec<u8>)>) -> Vec<(LedgerKey, Vec<u8>)> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    #[test]
    fn test_commit_and_get() {
        let mut tree = VersionedTree::new_memory();
        let (root, version) = tree
            .commit(&[], &sorted(vec![(key(1), b"one".to_vec()), (key(2), b"two".to_vec())]))
            .unwrap();
        assert_eq!(version, 1);
        assert!(!root.is_zero());
        assert_eq!(tree.get(&key(1)).unwrap(), b"one");
        assert_eq!(tree.get(&key(2)).unwrap(), b"two");
        assert!(tree.get(&key(3)).is_none());
    }

    #[test]
    fn test_root_is_batch_order_independent() {
        let batch = vec![
            (key(5), b"e".to_vec()),
            (key(1), b"a".to_vec()),
            (key(9), b"i".to_vec()),
            (key(3), b"c".to_vec()),
        ];
        let mut a = VersionedTree::new_memory();
        let mut b = VersionedTree::new_memory();
        let (root_a, _) = a.commit(&[], &sorted(batch.clone())).unwrap();
        let (root_b, _) = b.commit(&[], &sorted(batch)).unwrap();
        assert_eq!(root_a, root_b);
    }

    #[test]
    fn test_removal_applies_before_update() {
        let mut tree = VersionedTree::new_memory();
        tree.commit(&[], &[(key(1), b"v1".to_vec())]).unwrap();
        // delete-then-recreate within one block resolves to present
        let (_, version) = tree
            .commit(&[key(1)], &[(key(1), b"v2".to_vec())])
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(tree.get(&key(1)).unwrap(), b"v2");
    }

    #[test]
    fn test_removed_key_is_gone() {
        let mut tree = VersionedTree::new_memory();
        tree.commit(&[], &sorted(vec![(key(1), b"a".to_vec()), (key(2), b"b".to_vec())]))
            .unwrap();
        tree.commit(&[key(1)], &[]).unwrap();
        assert!(tree.get(&key(1)).is_none());
        assert_eq!(tree.get(&key(2)).unwrap(), b"b");
    }

    #[test]
    fn test_historical_reads_are_pinned() {
        let mut tree = VersionedTree::new_memory();
        tree.commit(&[], &[(key(1), b"old".to_vec())]).unwrap();
        tree.commit(&[], &[(key(1), b"new".to_vec())]).unwrap();

        let v1 = tree.entries_at(1).unwrap();
        assert_eq!(v1, vec![(key(1), b"old".to_vec())]);
        let v2 = tree.entries_at(2).unwrap();
        assert_eq!(v2, vec![(key(1), b"new".to_vec())]);
        assert_ne!(tree.root_at(1).unwrap(), tree.root_at(2).unwrap());
    }

    #[test]
    fn test_unknown_version_is_an_error() {
        let tree = VersionedTree::new_memory();
        assert!(matches!(
            tree.entries_at(9),
            Err(LedgerError::UnknownVersion(9))
        ));
    }

    #[test]
    fn test_stays_balanced() {
        let mut tree = VersionedTree::new_memory();
        let mut batch = Vec::new();
        for i in 0..200u8 {
            let mut bytes = [0u8; 32];
            bytes[0] = i;
            batch.push((LedgerKey::new(bytes), vec![i]));
        }
        // worst case for an unbalanced tree: ascending key order
        tree.commit(&[], &batch).unwrap();
        // AVL bound: 1.44 * log2(201) ~ 11
        assert!(tree.height() <= 11, "height {}", tree.height());
    }

    #[test]
    fn test_random_commits_match_model() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut tree = VersionedTree::new_memory();
        let mut model: BTreeMap<LedgerKey, Vec<u8>> = BTreeMap::new();

        for round in 0..25u64 {
            let mut removals: Vec<LedgerKey> = model
                .keys()
                .copied()
                .filter(|_| rng.gen_bool(0.2))
                .collect();
            removals.sort();
            for key in &removals {
                model.remove(key);
            }

            let mut batch: BTreeMap<LedgerKey, Vec<u8>> = BTreeMap::new();
            for _ in 0..rng.gen_range(1..20) {
                let mut bytes = [0u8; 32];
                bytes[0] = rng.gen_range(0..60);
                let key = LedgerKey::new(bytes);
                let value = vec![rng.gen::<u8>(), rng.gen::<u8>()];
                model.insert(key, value.clone());
                batch.insert(key, value);
            }
            let updates: Vec<(LedgerKey, Vec<u8>)> = batch.into_iter().collect();

            let (_, version) = tree.commit(&removals, &updates).unwrap();
            assert_eq!(version, round + 1);
            let expected: Vec<(LedgerKey, Vec<u8>)> =
                model.iter().map(|(k, v)| (*k, v.clone())).collect();
            assert_eq!(tree.entries(), expected);
        }
    }

    #[test]
    fn test_persistent_reload() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let sled_tree = db.open_tree("staking-test").unwrap();

        let (root, version) = {
            let mut tree = VersionedTree::new_persistent(sled_tree.clone()).unwrap();
            tree.commit(&[], &[(key(7), b"persisted".to_vec())]).unwrap();
            tree.commit(&[], &[(key(8), b"again".to_vec())]).unwrap()
        };

        let reloaded = VersionedTree::new_persistent(sled_tree).unwrap();
        assert_eq!(reloaded.version(), version);
        assert_eq!(reloaded.root_hash(), root);
        assert_eq!(reloaded.get(&key(7)).unwrap(), b"persisted");
        // historical snapshot still addressable through the db
        assert_eq!(
            reloaded.entries_at(1).unwrap(),
            vec![(key(7), b"persisted".to_vec())]
        );
    }
}
