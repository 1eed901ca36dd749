//! Mark phase: the set of nodes reachable from retained roots

use super::refs::NodeRefs;
use crate::model::NodeHash;
use crate::store::{KvColumn, NodeReader, RocksColumn, RocksDb, StoreConfig};
use crate::{Error, Result};
use std::collections::HashSet;
use tempfile::TempDir;
use tracing::debug;

/// Visited set of a mark pass
pub trait MarkSet {
    /// Add a hash; true when it was not marked before
    fn insert(&mut self, hash: NodeHash) -> Result<bool>;

    fn contains(&self, hash: &NodeHash) -> Result<bool>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Mark set held on the heap
#[derive(Debug, Default)]
pub struct InMemoryMarkSet {
    marked: HashSet<NodeHash>,
}

impl InMemoryMarkSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkSet for InMemoryMarkSet {
    fn insert(&mut self, hash: NodeHash) -> Result<bool> {
        Ok(self.marked.insert(hash))
    }

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        Ok(self.marked.contains(hash))
    }

    fn len(&self) -> u64 {
        self.marked.len() as u64
    }
}

/// Mark set kept in a scratch RocksDB under a temporary directory
///
/// Memory use does not grow with the number of marked nodes. The directory
/// is removed when the set is dropped.
pub struct DiskMarkSet {
    // declared before `dir` so the database closes before its files go away
    column: RocksColumn,
    count: u64,
    dir: TempDir,
}

impl DiskMarkSet {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("forestry-mark-").tempdir()?;
        let mut config = StoreConfig::new(dir.path());
        config.enable_compression = false;
        let db = RocksDb::open(&config, &[])?;
        debug!(path = %dir.path().display(), "created on-disk mark set");
        Ok(DiskMarkSet {
            column: db.nodes_column()?,
            count: 0,
            dir,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

impl MarkSet for DiskMarkSet {
    fn insert(&mut self, hash: NodeHash) -> Result<bool> {
        if self.column.get(hash.as_bytes())?.is_some() {
            return Ok(false);
        }
        self.column.put(hash.as_bytes(), &[])?;
        self.count += 1;
        Ok(true)
    }

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        Ok(self.column.get(hash.as_bytes())?.is_some())
    }

    fn len(&self) -> u64 {
        self.count
    }
}

/// Mark every node reachable from `roots`; returns the number newly marked
///
/// Traversal uses an explicit stack. A reachable node missing from `reader`
/// aborts the pass with [`Error::MissingNode`].
pub fn mark(reader: &dyn NodeReader, refs: &dyn NodeRefs, roots: &[NodeHash], set: &mut dyn MarkSet) -> Result<u64> {
    let mut stack: Vec<NodeHash> = roots.iter().copied().filter(|r| refs.is_stored(r)).collect();
    let mut marked = 0u64;
    while let Some(hash) = stack.pop() {
        if !set.insert(hash)? {
            continue;
        }
        marked += 1;
        let bytes = reader.read(&hash)?.ok_or(Error::MissingNode(hash))?;
        for child in refs.child_refs(&bytes)? {
            if refs.is_stored(&child) {
                stack.push(child);
            }
        }
    }
    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::TrieNodeRefs;
    use crate::store::{MemoryColumn, MemoryNodeStore, NodeStore};
    use crate::trie::MerklePatriciaTrie;

    #[test]
    fn test_mark_sets_agree() {
        let mut memory = InMemoryMarkSet::new();
        let mut disk = DiskMarkSet::create().unwrap();
        for set in [&mut memory as &mut dyn MarkSet, &mut disk as &mut dyn MarkSet] {
            let h = NodeHash::from_bytes([1; 32]);
            assert!(set.insert(h).unwrap());
            assert!(!set.insert(h).unwrap());
            assert!(set.contains(&h).unwrap());
            assert!(!set.contains(&NodeHash::ZERO).unwrap());
            assert_eq!(set.len(), 1);
        }
    }

    #[test]
    fn test_disk_mark_set_cleans_up() {
        let set = DiskMarkSet::create().unwrap();
        let path = set.path().to_path_buf();
        assert!(path.exists());
        drop(set);
        assert!(!path.exists());
    }

    #[test]
    fn test_mark_reaches_every_node_once() {
        let store = MemoryNodeStore::new(MemoryColumn::new());
        let mut trie = MerklePatriciaTrie::new(&store);
        for i in 0..50u8 {
            trie.put(&[i, i], &[i]).unwrap();
        }
        let reader = store.snapshot().unwrap();
        let mut set = InMemoryMarkSet::new();
        let marked = mark(reader.as_ref(), &TrieNodeRefs, &[trie.root_hash()], &mut set).unwrap();
        assert_eq!(marked, set.len());
        // every node of the final trie, and nothing from older roots
        assert!(marked < store.node_count().unwrap());
        assert!(set.contains(&trie.root_hash()).unwrap());
    }

    #[test]
    fn test_mark_reports_missing_nodes() {
        let store = MemoryNodeStore::new(MemoryColumn::new());
        let mut trie = MerklePatriciaTrie::new(&store);
        trie.put(b"a", b"1").unwrap();
        trie.put(b"b", b"2").unwrap();
        let root = trie.root_hash();
        let victim = {
            let reader = store.snapshot().unwrap();
            let bytes = reader.read(&root).unwrap().unwrap();
            TrieNodeRefs.child_refs(&bytes).unwrap()[0]
        };
        store.delete(&victim).unwrap();

        let reader = store.snapshot().unwrap();
        let err = mark(reader.as_ref(), &TrieNodeRefs, &[root], &mut InMemoryMarkSet::new()).unwrap_err();
        assert!(matches!(err, Error::MissingNode(h) if h == victim));
    }
}
