//! Per-commit node cache
//!
//! Nodes read from the store are memoized for the duration of one commit.
//! Nodes written by the commit stay in the cache until the commit is turned
//! into a batch; a node created and replaced inside the same commit never
//! reaches the store.

use super::node::{JmtNode, NodeKey, StaleEntry};
use super::store::{JmtBatch, JmtStore};
use crate::model::NodeHash;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Hit/miss counters of a [`TreeCache`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn add(&mut self, other: CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
    }
}

pub struct TreeCache<'a, S: JmtStore + ?Sized> {
    store: &'a S,
    version: u64,
    reads: HashMap<NodeKey, JmtNode>,
    created: BTreeMap<NodeKey, JmtNode>,
    stale: BTreeSet<NodeKey>,
    stats: CacheStats,
}

impl<'a, S: JmtStore + ?Sized> TreeCache<'a, S> {
    /// Cache for a commit of `version`
    pub fn new(store: &'a S, version: u64) -> Self {
        TreeCache {
            store,
            version,
            reads: HashMap::new(),
            created: BTreeMap::new(),
            stale: BTreeSet::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Load a node; `expected` is its commitment as recorded by the parent
    pub fn get(&mut self, key: &NodeKey, expected: &NodeHash) -> Result<JmtNode> {
        let cached = self.created.get(key).or_else(|| self.reads.get(key)).cloned();
        if let Some(node) = cached {
            self.stats.hits += 1;
            return Ok(node);
        }
        self.stats.misses += 1;
        let node = self
            .store
            .get_node(key)?
            .ok_or(Error::MissingNode(*expected))?;
        self.reads.insert(key.clone(), node.clone());
        Ok(node)
    }

    /// Record a node written by this commit
    pub fn put(&mut self, key: NodeKey, node: JmtNode) {
        self.created.insert(key, node);
    }

    /// Drop a node from the new tree; older nodes are recorded as stale
    pub fn retire(&mut self, key: &NodeKey) {
        if key.version == self.version {
            self.created.remove(key);
        } else {
            self.stale.insert(key.clone());
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.len()
    }

    pub fn stale_count(&self) -> usize {
        self.stale.len()
    }

    /// Writes of this commit, ready for the store
    pub fn into_batch(self) -> JmtBatch {
        let version = self.version;
        JmtBatch {
            put_nodes: self.created.into_iter().collect(),
            put_stale: self
                .stale
                .into_iter()
                .map(|node| StaleEntry {
                    stale_since: version,
                    node,
                })
                .collect(),
            ..JmtBatch::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jmt::MemoryJmtStore;
    use crate::model::NibblePath;

    fn leaf(b: u8) -> JmtNode {
        JmtNode::Leaf {
            key_hash: NodeHash::from_bytes([b; 32]),
            value: vec![b],
        }
    }

    #[test]
    fn test_hits_and_misses() {
        let store = MemoryJmtStore::new();
        let old = NodeKey::new(1, NibblePath::empty());
        let mut seed = JmtBatch::default();
        seed.put_nodes.push((old.clone(), leaf(1)));
        store.write(seed).unwrap();

        let mut cache = TreeCache::new(&store, 2);
        cache.get(&old, &NodeHash::ZERO).unwrap();
        cache.get(&old, &NodeHash::ZERO).unwrap();
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });

        let missing = NodeKey::new(1, NibblePath::from_hex("a").unwrap());
        let expected = NodeHash::from_bytes([7; 32]);
        assert!(matches!(cache.get(&missing, &expected), Err(Error::MissingNode(h)) if h == expected));
    }

    #[test]
    fn test_retire_distinguishes_new_and_old_nodes() {
        let store = MemoryJmtStore::new();
        let mut cache = TreeCache::new(&store, 5);
        let fresh = NodeKey::new(5, NibblePath::empty());
        let old = NodeKey::new(3, NibblePath::from_hex("1").unwrap());

        cache.put(fresh.clone(), leaf(1));
        cache.retire(&fresh);
        cache.retire(&old);
        assert_eq!(cache.created_count(), 0);
        assert_eq!(cache.stale_count(), 1);

        let batch = cache.into_batch();
        assert!(batch.put_nodes.is_empty());
        assert_eq!(
            batch.put_stale,
            vec![StaleEntry {
                stale_since: 5,
                node: old
            }]
        );
    }
}
