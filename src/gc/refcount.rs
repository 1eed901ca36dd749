//! Incremental collection through per-node reference counts
//!
//! A node's count is the number of references to it: one per committed
//! version whose root it is, plus one per counted parent holding it in a
//! slot. Counting a root descends only into nodes seen for the first time, so
//! a commit costs as many count updates as it wrote new nodes.

use super::refs::NodeRefs;
use crate::model::NodeHash;
use crate::store::NodeStore;
use crate::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

pub struct RefcountTracker<'a> {
    nodes: &'a dyn NodeStore,
    refs: &'a dyn NodeRefs,
}

/// Pending count changes, read through to the store
struct Counts<'a> {
    nodes: &'a dyn NodeStore,
    counts: HashMap<NodeHash, u64>,
}

impl<'a> Counts<'a> {
    fn get(&mut self, hash: &NodeHash) -> Result<u64> {
        if let Some(count) = self.counts.get(hash) {
            return Ok(*count);
        }
        let count = self.nodes.refcount(hash)?;
        self.counts.insert(*hash, count);
        Ok(count)
    }

    fn set(&mut self, hash: NodeHash, count: u64) {
        self.counts.insert(hash, count);
    }
}

impl<'a> RefcountTracker<'a> {
    pub fn new(nodes: &'a dyn NodeStore, refs: &'a dyn NodeRefs) -> Self {
        RefcountTracker { nodes, refs }
    }

    /// Count one new reference to `root`; returns how many nodes became counted
    ///
    /// Writes go through the node store, so calling this inside a batch puts
    /// the counts in the same atomic write as the nodes.
    pub fn increment_root(&self, root: &NodeHash) -> Result<u64> {
        let mut counts = self.counts();
        let mut stack = self.stored(&[*root]);
        let mut fresh = 0u64;
        while let Some(hash) = stack.pop() {
            let count = counts.get(&hash)?;
            counts.set(hash, count + 1);
            if count == 0 {
                fresh += 1;
                stack.extend(self.stored(&self.children(&hash)?));
            }
        }
        self.flush(counts, &[])?;
        debug!(root = %root, fresh, "counted root");
        Ok(fresh)
    }

    /// Drop one reference to `root`, deleting every node whose count reaches zero
    ///
    /// Returns the deleted hashes. With `dry_run` nothing is written.
    pub fn decrement_root(&self, root: &NodeHash, dry_run: bool) -> Result<Vec<NodeHash>> {
        self.decrement_roots(&[*root], dry_run)
    }

    /// Drop one reference per entry of `roots`; a root listed twice loses two
    pub fn decrement_roots(&self, roots: &[NodeHash], dry_run: bool) -> Result<Vec<NodeHash>> {
        let mut counts = self.counts();
        let mut stack = self.stored(roots);
        let mut doomed = Vec::new();
        while let Some(hash) = stack.pop() {
            let count = counts.get(&hash)?;
            if count == 0 {
                return Err(Error::Corruption(format!(
                    "node {} is referenced but has no reference count",
                    hash
                )));
            }
            counts.set(hash, count - 1);
            if count == 1 {
                stack.extend(self.stored(&self.children(&hash)?));
                doomed.push(hash);
            }
        }
        if !dry_run {
            self.flush(counts, &doomed)?;
        }
        debug!(roots = roots.len(), deleted = doomed.len(), dry_run, "released roots");
        Ok(doomed)
    }

    fn counts(&self) -> Counts<'a> {
        Counts {
            nodes: self.nodes,
            counts: HashMap::new(),
        }
    }

    fn stored(&self, hashes: &[NodeHash]) -> Vec<NodeHash> {
        hashes.iter().copied().filter(|h| self.refs.is_stored(h)).collect()
    }

    fn children(&self, hash: &NodeHash) -> Result<Vec<NodeHash>> {
        let bytes = self.nodes.get(hash)?.ok_or(Error::MissingNode(*hash))?;
        self.refs.child_refs(&bytes)
    }

    fn flush(&self, counts: Counts<'_>, doomed: &[NodeHash]) -> Result<()> {
        self.nodes.with_batch(&mut || {
            for (hash, count) in &counts.counts {
                self.nodes.set_refcount(hash, *count)?;
            }
            for hash in doomed {
                self.nodes.delete(hash)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::TrieNodeRefs;
    use crate::store::{MemoryColumn, MemoryNodeStore};
    use crate::trie::MerklePatriciaTrie;

    #[test]
    fn test_shared_subtrees_survive_release() {
        let store = MemoryNodeStore::new(MemoryColumn::new());
        let tracker = RefcountTracker::new(&store, &TrieNodeRefs);

        let mut trie = MerklePatriciaTrie::new(&store);
        for i in 0..16u8 {
            trie.put(&[i << 4, 1], &[i]).unwrap();
        }
        let v1 = trie.root_hash();
        tracker.increment_root(&v1).unwrap();

        trie.put(&[0x00, 1], b"changed").unwrap();
        let v2 = trie.root_hash();
        let fresh = tracker.increment_root(&v2).unwrap();
        // only the new leaf and the new root are counted
        assert_eq!(fresh, 2);

        let deleted = tracker.decrement_root(&v1, false).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(!store.contains(&v1).unwrap());
        assert_eq!(trie.get(&[0x30, 1]).unwrap(), Some(vec![3]));
        assert_eq!(trie.get(&[0x00, 1]).unwrap(), Some(b"changed".to_vec()));

        // the root and all sixteen leaves go with the last reference
        assert_eq!(tracker.decrement_root(&v2, false).unwrap().len(), 17);
        assert_eq!(store.refcount(&v2).unwrap(), 0);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let store = MemoryNodeStore::new(MemoryColumn::new());
        let tracker = RefcountTracker::new(&store, &TrieNodeRefs);
        let mut trie = MerklePatriciaTrie::new(&store);
        trie.put(b"k1", b"v").unwrap();
        trie.put(b"k2", b"v").unwrap();
        let root = trie.root_hash();
        tracker.increment_root(&root).unwrap();

        let nodes = store.node_count().unwrap();
        let would = tracker.decrement_root(&root, true).unwrap();
        assert!(!would.is_empty());
        assert_eq!(store.node_count().unwrap(), nodes);
        assert_eq!(store.refcount(&root).unwrap(), 1);
    }

    #[test]
    fn test_uncounted_root_is_corruption() {
        let store = MemoryNodeStore::new(MemoryColumn::new());
        let tracker = RefcountTracker::new(&store, &TrieNodeRefs);
        let mut trie = MerklePatriciaTrie::new(&store);
        trie.put(b"k", b"v").unwrap();
        assert!(matches!(
            tracker.decrement_root(&trie.root_hash(), false),
            Err(Error::Corruption(_))
        ));
        assert!(tracker.decrement_root(&NodeHash::ZERO, false).unwrap().is_empty());
    }
}
