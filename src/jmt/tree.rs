//! Jellyfish Merkle tree: a versioned radix-16 tree over hashed keys

use super::cache::{CacheStats, TreeCache};
use super::node::{children_root, ChildRef, JmtNode, NodeKey, RootEntry};
use super::store::{JmtBatch, JmtStore};
use crate::model::merkle::RADIX;
use crate::model::{Blake2b256, Hasher, NibblePath, NodeHash};
use crate::proof::{build_proof, MpfProof, ProofSource, WalkNode};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Outcome of [`JellyfishMerkleTree::prune_up_to`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub nodes_deleted: usize,
    pub versions_removed: usize,
}

/// A versioned tree whose commits write only the nodes they change
///
/// Nodes are keyed by the version that wrote them and their position, so
/// every committed version stays readable until pruned. Commitments follow
/// the forestry scheme: the root of a key set equals the
/// [`SecureTrie`](crate::trie::SecureTrie) root of the same set, and proofs
/// use the MPF wire format.
///
/// Reading a version that was never committed yields the state of the
/// highest committed version below it.
pub struct JellyfishMerkleTree<'a, S: JmtStore + ?Sized> {
    store: &'a S,
    hasher: Arc<dyn Hasher>,
    stats: Mutex<CacheStats>,
}

impl<'a, S: JmtStore + ?Sized> JellyfishMerkleTree<'a, S> {
    pub fn new(store: &'a S) -> Self {
        JellyfishMerkleTree {
            store,
            hasher: Arc::new(Blake2b256),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn hasher(&self) -> &dyn Hasher {
        self.hasher.as_ref()
    }

    pub fn latest_version(&self) -> Result<Option<u64>> {
        self.store.latest_version()
    }

    /// Cache hits and misses summed over every commit of this handle
    pub fn cache_stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    /// Apply `updates` as `version`; `None` deletes a key
    ///
    /// `version` must be higher than every committed version. Returns the new root.
    pub fn commit(&self, version: u64, updates: &BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<NodeHash> {
        let latest = self.store.latest_version()?;
        if let Some(latest) = latest {
            if version <= latest {
                return Err(Error::VersionConflict {
                    latest,
                    requested: version,
                });
            }
        }
        if updates.values().any(|v| matches!(v, Some(v) if v.is_empty())) {
            return Err(Error::InvalidValue(
                "empty values are not stored; pass None to delete".into(),
            ));
        }

        let base = match latest {
            Some(l) => self.root_entry(l)?,
            None => RootEntry::empty(),
        };
        let mut root = base.node.map(|k| ChildRef {
            version: k.version,
            hash: base.hash,
        });

        // hashed keys in path order
        let hashed: BTreeMap<NodeHash, Option<&Vec<u8>>> = updates
            .iter()
            .map(|(k, v)| (self.hasher.digest(k), v.as_ref()))
            .collect();

        let mut cache = TreeCache::new(self.store, version);
        let top = NibblePath::empty();
        for (key_hash, value) in hashed {
            let path = NibblePath::from_bytes(key_hash.as_bytes());
            root = match value {
                Some(value) => Some(self.insert(&mut cache, root, &top, &path, key_hash, value)?),
                None => match root {
                    Some(current) => match self.remove(&mut cache, current, &top, &path, key_hash)? {
                        Some(replacement) => replacement,
                        None => Some(current),
                    },
                    None => None,
                },
            };
        }

        let entry = RootEntry {
            node: root.map(|r| NodeKey::new(r.version, NibblePath::empty())),
            hash: root.map_or(NodeHash::ZERO, |r| r.hash),
        };
        let hash = entry.hash;
        let stats = cache.stats();
        let (created, stale) = (cache.created_count(), cache.stale_count());
        let mut batch = cache.into_batch();
        batch.put_roots.push((version, entry));
        self.store.write(batch)?;
        self.stats.lock().add(stats);

        info!(version, root = %hash, created, stale, "committed jmt version");
        Ok(hash)
    }

    /// Root of the tree as of `version`; the null hash when empty
    pub fn root_hash(&self, version: u64) -> Result<NodeHash> {
        Ok(self.root_entry(version)?.hash)
    }

    pub fn get(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        let entry = self.root_entry(version)?;
        let key_hash = self.hasher.digest(key);
        let path = NibblePath::from_bytes(key_hash.as_bytes());
        let mut current = match entry.node {
            Some(node) => (node, entry.hash),
            None => return Ok(None),
        };
        loop {
            let (node_key, hash) = current;
            match self.load(&node_key, &hash)? {
                JmtNode::Leaf { key_hash: stored, value } => {
                    return Ok(if stored == key_hash { Some(value) } else { None });
                }
                JmtNode::Internal { prefix, children } => {
                    if !path.suffix(node_key.path.len()).starts_with(&prefix) {
                        return Ok(None);
                    }
                    let depth = node_key.path.len() + prefix.len();
                    match children[path.get(depth) as usize] {
                        Some(child) => {
                            current = (NodeKey::new(child.version, path.prefix(depth + 1)), child.hash)
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Inclusion or exclusion proof for `key` as of `version`
    pub fn get_proof(&self, key: &[u8], version: u64) -> Result<MpfProof> {
        let entry = self.root_entry(version)?;
        let path = NibblePath::from_bytes(self.hasher.digest(key).as_bytes());
        let view = VersionView {
            store: self.store,
            hasher: self.hasher(),
        };
        build_proof(&view, self.hasher(), entry.node.map(|k| (k, entry.hash)), &path)
    }

    pub fn get_proof_wire(&self, key: &[u8], version: u64) -> Result<Vec<u8>> {
        Ok(self.get_proof(key, version)?.to_wire())
    }

    pub fn verify_inclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], value: &[u8], proof: &MpfProof) -> bool {
        let path = NibblePath::from_bytes(hasher.digest(key).as_bytes());
        proof.verify_inclusion(hasher, root, &path, &hasher.digest(value))
    }

    pub fn verify_exclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], proof: &MpfProof) -> bool {
        let path = NibblePath::from_bytes(hasher.digest(key).as_bytes());
        proof.verify_exclusion(hasher, root, &path)
    }

    /// Delete nodes that went stale at or before `version`
    ///
    /// `version` stays readable; every version below it becomes
    /// [`VersionPruned`](Error::VersionPruned).
    pub fn prune_up_to(&self, version: u64) -> Result<PruneReport> {
        let latest = match self.store.latest_version()? {
            Some(latest) => latest,
            None => return Ok(PruneReport::default()),
        };
        if version > latest {
            return Err(Error::VersionConflict {
                latest,
                requested: version,
            });
        }
        if version <= self.store.min_readable_version()? {
            return Ok(PruneReport::default());
        }

        let stale = self.store.stale_up_to(version)?;
        // keep the root that answers reads of `version` itself
        let floor = self
            .store
            .root_at_or_before(version)?
            .map_or(version, |(v, _)| v);
        let delete_roots = self.store.root_versions_below(floor)?;
        let report = PruneReport {
            nodes_deleted: stale.len(),
            versions_removed: delete_roots.len(),
        };

        self.store.write(JmtBatch {
            delete_nodes: stale.iter().map(|e| e.node.clone()).collect(),
            delete_stale: stale,
            delete_roots,
            min_readable: Some(version),
            ..JmtBatch::default()
        })?;
        info!(
            version,
            nodes = report.nodes_deleted,
            versions = report.versions_removed,
            "pruned jmt"
        );
        Ok(report)
    }

    // === Internal helpers ===

    fn root_entry(&self, version: u64) -> Result<RootEntry> {
        if version < self.store.min_readable_version()? {
            return Err(Error::VersionPruned(version));
        }
        Ok(self
            .store
            .root_at_or_before(version)?
            .map_or_else(RootEntry::empty, |(_, entry)| entry))
    }

    fn load(&self, key: &NodeKey, hash: &NodeHash) -> Result<JmtNode> {
        self.store.get_node(key)?.ok_or(Error::MissingNode(*hash))
    }

    /// Store `node` at `position` under the commit's version
    fn write(&self, cache: &mut TreeCache<'_, S>, position: NibblePath, node: JmtNode) -> ChildRef {
        let hash = node.commitment(self.hasher(), &position);
        let version = cache.version();
        cache.put(NodeKey::new(version, position), node);
        ChildRef { version, hash }
    }

    fn insert(
        &self,
        cache: &mut TreeCache<'_, S>,
        current: Option<ChildRef>,
        position: &NibblePath,
        path: &NibblePath,
        key_hash: NodeHash,
        value: &[u8],
    ) -> Result<ChildRef> {
        let new_leaf = || JmtNode::Leaf {
            key_hash,
            value: value.to_vec(),
        };
        let current = match current {
            Some(current) => current,
            None => return Ok(self.write(cache, position.clone(), new_leaf())),
        };
        let key = NodeKey::new(current.version, position.clone());
        let node = cache.get(&key, &current.hash)?;
        cache.retire(&key);

        match node {
            JmtNode::Leaf {
                key_hash: existing,
                value: old,
            } => {
                if existing == key_hash {
                    return Ok(self.write(cache, position.clone(), new_leaf()));
                }
                // hashed paths have equal length, so they differ before the end
                let other = NibblePath::from_bytes(existing.as_bytes());
                let depth = position.len()
                    + path
                        .suffix(position.len())
                        .common_prefix_len(&other.suffix(position.len()));
                let mut children = [None; RADIX];
                children[other.get(depth) as usize] = Some(self.write(
                    cache,
                    other.prefix(depth + 1),
                    JmtNode::Leaf {
                        key_hash: existing,
                        value: old,
                    },
                ));
                children[path.get(depth) as usize] = Some(self.write(cache, path.prefix(depth + 1), new_leaf()));
                Ok(self.write(
                    cache,
                    position.clone(),
                    JmtNode::Internal {
                        prefix: path.slice(position.len(), depth),
                        children,
                    },
                ))
            }
            JmtNode::Internal { prefix, mut children } => {
                let common = path.suffix(position.len()).common_prefix_len(&prefix);
                if common == prefix.len() {
                    let depth = position.len() + prefix.len();
                    let slot = path.get(depth) as usize;
                    let child = self.insert(cache, children[slot], &path.prefix(depth + 1), path, key_hash, value)?;
                    children[slot] = Some(child);
                    return Ok(self.write(cache, position.clone(), JmtNode::Internal { prefix, children }));
                }

                // the path leaves the prefix: the node moves below a new fork,
                // its children keep their positions
                let depth = position.len() + common;
                let moved_nibble = prefix.get(common);
                let moved = self.write(
                    cache,
                    path.prefix(depth).push(moved_nibble),
                    JmtNode::Internal {
                        prefix: prefix.suffix(common + 1),
                        children,
                    },
                );
                let mut fork = [None; RADIX];
                fork[moved_nibble as usize] = Some(moved);
                fork[path.get(depth) as usize] = Some(self.write(cache, path.prefix(depth + 1), new_leaf()));
                Ok(self.write(
                    cache,
                    position.clone(),
                    JmtNode::Internal {
                        prefix: prefix.prefix(common),
                        children: fork,
                    },
                ))
            }
        }
    }

    /// Remove `key_hash` below `current`; `None` when absent, otherwise the
    /// replacement for `current` at the same position
    fn remove(
        &self,
        cache: &mut TreeCache<'_, S>,
        current: ChildRef,
        position: &NibblePath,
        path: &NibblePath,
        key_hash: NodeHash,
    ) -> Result<Option<Option<ChildRef>>> {
        let key = NodeKey::new(current.version, position.clone());
        match cache.get(&key, &current.hash)? {
            JmtNode::Leaf { key_hash: stored, .. } => {
                if stored != key_hash {
                    return Ok(None);
                }
                cache.retire(&key);
                Ok(Some(None))
            }
            JmtNode::Internal { prefix, mut children } => {
                if !path.suffix(position.len()).starts_with(&prefix) {
                    return Ok(None);
                }
                let depth = position.len() + prefix.len();
                let slot = path.get(depth) as usize;
                let child = match children[slot] {
                    Some(child) => child,
                    None => return Ok(None),
                };
                let replacement = match self.remove(cache, child, &path.prefix(depth + 1), path, key_hash)? {
                    Some(replacement) => replacement,
                    None => return Ok(None),
                };
                cache.retire(&key);
                children[slot] = replacement;

                let occupied: Vec<usize> = (0..RADIX).filter(|i| children[*i].is_some()).collect();
                match occupied.as_slice() {
                    [] => Ok(Some(None)),
                    [only] => {
                        // a single child left: pull it up into this position
                        let only = *only;
                        let child = children[only].ok_or_else(|| Error::Corruption("vanished child".into()))?;
                        let child_key = NodeKey::new(child.version, path.prefix(depth).push(only as u8));
                        let lifted = match cache.get(&child_key, &child.hash)? {
                            leaf @ JmtNode::Leaf { .. } => leaf,
                            JmtNode::Internal {
                                prefix: below,
                                children: grandchildren,
                            } => JmtNode::Internal {
                                prefix: prefix.push(only as u8).concat(&below),
                                children: grandchildren,
                            },
                        };
                        cache.retire(&child_key);
                        Ok(Some(Some(self.write(cache, position.clone(), lifted))))
                    }
                    _ => Ok(Some(Some(self.write(
                        cache,
                        position.clone(),
                        JmtNode::Internal { prefix, children },
                    )))),
                }
            }
        }
    }
}

/// Proof walk over the nodes of one version
struct VersionView<'a, S: JmtStore + ?Sized> {
    store: &'a S,
    hasher: &'a dyn Hasher,
}

impl<'a, S: JmtStore + ?Sized> ProofSource for VersionView<'a, S> {
    type Id = (NodeKey, NodeHash);

    fn load(&self, id: &Self::Id) -> Result<WalkNode<Self::Id>> {
        let (key, hash) = id;
        match self.store.get_node(key)?.ok_or(Error::MissingNode(*hash))? {
            JmtNode::Leaf { key_hash, value } => Ok(WalkNode::Leaf {
                suffix: NibblePath::from_bytes(key_hash.as_bytes()).suffix(key.path.len()),
                value_hash: self.hasher.digest(&value),
            }),
            JmtNode::Internal { prefix, children } => {
                let base = key.path.concat(&prefix);
                let mut walk: [Option<(Self::Id, NodeHash)>; RADIX] = Default::default();
                for (nibble, (slot, child)) in walk.iter_mut().zip(children.iter()).enumerate() {
                    if let Some(c) = child {
                        let child_key = NodeKey::new(c.version, base.push(nibble as u8));
                        *slot = Some(((child_key, c.hash), c.hash));
                    }
                }
                Ok(WalkNode::Branch {
                    root: children_root(self.hasher, &children),
                    prefix,
                    children: walk,
                    value_hash: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jmt::MemoryJmtStore;
    use crate::store::{MemoryColumn, MemoryNodeStore};
    use crate::trie::SecureTrie;

    fn updates(pairs: &[(&str, Option<&str>)]) -> BTreeMap<Vec<u8>, Option<Vec<u8>>> {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.map(|v| v.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_commit_and_read_versions() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);

        jmt.commit(1, &updates(&[("apple", Some("200")), ("mango", Some("100"))]))
            .unwrap();
        jmt.commit(2, &updates(&[("apple", Some("400")), ("orange", Some("300"))]))
            .unwrap();

        assert_eq!(jmt.get(b"apple", 1).unwrap(), Some(b"200".to_vec()));
        assert_eq!(jmt.get(b"apple", 2).unwrap(), Some(b"400".to_vec()));
        assert_eq!(jmt.get(b"orange", 1).unwrap(), None);
        assert_eq!(jmt.get(b"orange", 2).unwrap(), Some(b"300".to_vec()));
        // an uncommitted version reads as the last commit below it
        assert_eq!(jmt.root_hash(7).unwrap(), jmt.root_hash(2).unwrap());
        assert_eq!(jmt.root_hash(0).unwrap(), NodeHash::ZERO);
        assert_eq!(jmt.latest_version().unwrap(), Some(2));
    }

    #[test]
    fn test_root_matches_secure_trie() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        let nodes = MemoryNodeStore::new(MemoryColumn::new());
        let mut trie = SecureTrie::new(&nodes);

        let mut batch = BTreeMap::new();
        for i in 0..40u32 {
            let key = format!("key-{}", i).into_bytes();
            let value = format!("value-{}", i).into_bytes();
            trie.put(&key, &value).unwrap();
            batch.insert(key, Some(value));
        }
        let root = jmt.commit(1, &batch).unwrap();
        assert_eq!(root, trie.root_hash());

        let mut removals = BTreeMap::new();
        for i in (0..40u32).step_by(3) {
            let key = format!("key-{}", i).into_bytes();
            trie.delete(&key).unwrap();
            removals.insert(key, None);
        }
        let root = jmt.commit(2, &removals).unwrap();
        assert_eq!(root, trie.root_hash());
    }

    #[test]
    fn test_delete_everything_and_absent_keys() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        jmt.commit(1, &updates(&[("a", Some("1")), ("b", Some("2"))])).unwrap();
        let before = jmt.root_hash(1).unwrap();
        assert_eq!(jmt.commit(2, &updates(&[("zzz", None)])).unwrap(), before);
        assert_eq!(
            jmt.commit(3, &updates(&[("a", None), ("b", None)])).unwrap(),
            NodeHash::ZERO
        );
        assert_eq!(jmt.get(b"a", 3).unwrap(), None);
        assert_eq!(jmt.get(b"a", 2).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_versions_must_increase() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        jmt.commit(5, &updates(&[("a", Some("1"))])).unwrap();
        assert!(matches!(
            jmt.commit(5, &updates(&[("a", Some("2"))])),
            Err(Error::VersionConflict {
                latest: 5,
                requested: 5
            })
        ));
        assert!(matches!(
            jmt.commit(6, &updates(&[("a", Some(""))])),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn test_historical_proofs() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        let h = Blake2b256;
        let mut batch = BTreeMap::new();
        for i in 0..32u8 {
            batch.insert(vec![i], Some(vec![i, i]));
        }
        jmt.commit(1, &batch).unwrap();
        jmt.commit(2, &updates(&[("late", Some("x"))])).unwrap();

        let root1 = jmt.root_hash(1).unwrap();
        let proof = jmt.get_proof(&[7], 1).unwrap();
        assert!(JellyfishMerkleTree::<MemoryJmtStore>::verify_inclusion(&h, &root1, &[7], &[7, 7], &proof));

        let absent = jmt.get_proof(b"late", 1).unwrap();
        assert!(JellyfishMerkleTree::<MemoryJmtStore>::verify_exclusion(&h, &root1, b"late", &absent));

        let wire = jmt.get_proof_wire(b"late", 2).unwrap();
        let decoded = MpfProof::from_wire(&wire).unwrap();
        let root2 = jmt.root_hash(2).unwrap();
        assert!(JellyfishMerkleTree::<MemoryJmtStore>::verify_inclusion(&h, &root2, b"late", b"x", &decoded));
    }

    #[test]
    fn test_prune_removes_stale_nodes_only() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        for v in 1..=4u64 {
            let mut batch = BTreeMap::new();
            for i in 0..8u8 {
                batch.insert(vec![i], Some(vec![i, v as u8]));
            }
            jmt.commit(v, &batch).unwrap();
        }
        let before = store.node_count().unwrap();
        let report = jmt.prune_up_to(3).unwrap();
        assert!(report.nodes_deleted > 0);
        assert_eq!(report.versions_removed, 2);
        assert_eq!(store.node_count().unwrap(), before - report.nodes_deleted as u64);

        assert!(matches!(jmt.get(&[1], 2), Err(Error::VersionPruned(2))));
        assert_eq!(jmt.get(&[1], 3).unwrap(), Some(vec![1, 3]));
        assert_eq!(jmt.get(&[1], 4).unwrap(), Some(vec![1, 4]));
        assert!(jmt.get_proof(&[1], 3).is_ok());

        assert_eq!(jmt.prune_up_to(2).unwrap(), PruneReport::default());
        assert!(matches!(jmt.prune_up_to(9), Err(Error::VersionConflict { .. })));
    }

    #[test]
    fn test_cache_counts_reads() {
        let store = MemoryJmtStore::new();
        let jmt = JellyfishMerkleTree::new(&store);
        jmt.commit(1, &updates(&[("a", Some("1")), ("b", Some("2")), ("c", Some("3"))]))
            .unwrap();
        jmt.commit(2, &updates(&[("a", Some("4")), ("d", Some("5"))])).unwrap();
        let stats = jmt.cache_stats();
        assert!(stats.misses > 0);
        assert!(stats.hits > 0);
    }
}
