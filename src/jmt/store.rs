//! Storage of versioned nodes, roots and the stale index
//!
//! ```text
//! jmt_nodes:  node key                      node bytes (bincode)
//! jmt_roots:  version (u64 BE)              root entry (bincode)
//!             "PRUNED"                      lowest readable version (u64 BE)
//! jmt_stale:  stale_since (u64 BE) ‖ key    empty
//! ```

use super::node::{JmtNode, NodeKey, RootEntry, StaleEntry};
use crate::store::{decode_u64, KvColumn, MemoryColumn, MemoryDb, RocksColumn, RocksDb, SpecialKey, StorageKey};
use crate::{Error, Result};
use tracing::debug;

pub const JMT_NODES_CF: &str = "jmt_nodes";
pub const JMT_ROOTS_CF: &str = "jmt_roots";
pub const JMT_STALE_CF: &str = "jmt_stale";

/// Column families to pass to [`RocksDb::open`] for a [`RocksJmtStore`]
pub const JMT_COLUMN_FAMILIES: [&str; 3] = [JMT_NODES_CF, JMT_ROOTS_CF, JMT_STALE_CF];

/// Everything one commit or prune writes, applied atomically
#[derive(Debug, Default)]
pub struct JmtBatch {
    pub put_nodes: Vec<(NodeKey, JmtNode)>,
    pub delete_nodes: Vec<NodeKey>,
    pub put_stale: Vec<StaleEntry>,
    pub delete_stale: Vec<StaleEntry>,
    pub put_roots: Vec<(u64, RootEntry)>,
    pub delete_roots: Vec<u64>,
    pub min_readable: Option<u64>,
}

pub trait JmtStore: Send + Sync {
    fn get_node(&self, key: &NodeKey) -> Result<Option<JmtNode>>;

    /// Highest committed version `<= version` and its root
    fn root_at_or_before(&self, version: u64) -> Result<Option<(u64, RootEntry)>>;

    fn latest_version(&self) -> Result<Option<u64>> {
        Ok(self.root_at_or_before(u64::MAX)?.map(|(v, _)| v))
    }

    /// Versions below this one have been pruned
    fn min_readable_version(&self) -> Result<u64>;

    /// Committed versions strictly below `version`, ascending
    fn root_versions_below(&self, version: u64) -> Result<Vec<u64>>;

    /// Stale entries with `stale_since <= version`, ascending
    fn stale_up_to(&self, version: u64) -> Result<Vec<StaleEntry>>;

    fn node_count(&self) -> Result<u64>;

    fn write(&self, batch: JmtBatch) -> Result<()>;
}

/// [`JmtStore`] over three raw columns
pub struct KvJmtStore<C: KvColumn> {
    nodes: C,
    roots: C,
    stale: C,
}

pub type MemoryJmtStore = KvJmtStore<MemoryColumn>;
pub type RocksJmtStore = KvJmtStore<RocksColumn>;

impl<C: KvColumn> KvJmtStore<C> {
    pub fn from_columns(nodes: C, roots: C, stale: C) -> Self {
        KvJmtStore { nodes, roots, stale }
    }

    fn apply(&self, batch: &JmtBatch) -> Result<()> {
        for (key, node) in &batch.put_nodes {
            self.nodes.put(&key.encode(), &node.encode()?)?;
        }
        for key in &batch.delete_nodes {
            self.nodes.delete(&key.encode())?;
        }
        for entry in &batch.put_stale {
            self.stale.put(&entry.encode(), &[])?;
        }
        for entry in &batch.delete_stale {
            self.stale.delete(&entry.encode())?;
        }
        for (version, root) in &batch.put_roots {
            self.roots
                .put(&StorageKey::Version(*version).encode(), &bincode::serialize(root)?)?;
        }
        for version in &batch.delete_roots {
            self.roots.delete(&StorageKey::Version(*version).encode())?;
        }
        if let Some(min) = batch.min_readable {
            self.roots.put(
                &StorageKey::Special(SpecialKey::Pruned).encode(),
                &min.to_be_bytes(),
            )?;
        }
        Ok(())
    }
}

impl MemoryJmtStore {
    pub fn new() -> Self {
        let db = MemoryDb::new();
        KvJmtStore::from_columns(db.column(JMT_NODES_CF), db.column(JMT_ROOTS_CF), db.column(JMT_STALE_CF))
    }
}

impl Default for MemoryJmtStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RocksJmtStore {
    /// Use the jmt column families of an open database, in its namespace
    ///
    /// The database must have been opened with [`JMT_COLUMN_FAMILIES`].
    pub fn open(db: &RocksDb) -> Result<Self> {
        Ok(KvJmtStore::from_columns(
            db.column(JMT_NODES_CF)?,
            db.column(JMT_ROOTS_CF)?,
            db.column(JMT_STALE_CF)?,
        ))
    }
}

impl<C: KvColumn> JmtStore for KvJmtStore<C> {
    fn get_node(&self, key: &NodeKey) -> Result<Option<JmtNode>> {
        match self.nodes.get(&key.encode())? {
            Some(bytes) => Ok(Some(JmtNode::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn root_at_or_before(&self, version: u64) -> Result<Option<(u64, RootEntry)>> {
        let mut found = None;
        self.roots
            .scan_rev(&StorageKey::Version(version).encode(), &mut |key, value| {
                let v = match StorageKey::decode_roots_cf(key) {
                    Ok(StorageKey::Version(v)) => v,
                    _ => return Ok(true),
                };
                let entry: RootEntry = bincode::deserialize(value)
                    .map_err(|e| Error::Corruption(format!("root entry of version {}: {}", v, e)))?;
                found = Some((v, entry));
                Ok(false)
            })?;
        Ok(found)
    }

    fn min_readable_version(&self) -> Result<u64> {
        match self
            .roots
            .get(&StorageKey::Special(SpecialKey::Pruned).encode())?
        {
            Some(bytes) => decode_u64(&bytes)
                .map_err(|_| Error::Corruption("PRUNED entry is not a u64".into())),
            None => Ok(0),
        }
    }

    fn root_versions_below(&self, version: u64) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        self.roots
            .scan(&StorageKey::Version(0).encode(), &mut |key, _| {
                match StorageKey::decode_roots_cf(key) {
                    Ok(StorageKey::Version(v)) if v < version => out.push(v),
                    Ok(StorageKey::Version(_)) => return Ok(false),
                    _ => {}
                }
                Ok(true)
            })?;
        Ok(out)
    }

    fn stale_up_to(&self, version: u64) -> Result<Vec<StaleEntry>> {
        let mut out = Vec::new();
        self.stale.scan(&[], &mut |key, _| {
            let entry = StaleEntry::decode(key)?;
            if entry.stale_since > version {
                return Ok(false);
            }
            out.push(entry);
            Ok(true)
        })?;
        Ok(out)
    }

    fn node_count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.nodes.scan(&[], &mut |_, _| {
            count += 1;
            Ok(true)
        })?;
        Ok(count)
    }

    fn write(&self, batch: JmtBatch) -> Result<()> {
        // columns of one database share a staging area, so the nested scopes
        // collapse into a single write batch
        self.nodes.with_batch(&mut || {
            self.roots
                .with_batch(&mut || self.stale.with_batch(&mut || self.apply(&batch)))
        })?;
        debug!(
            nodes = batch.put_nodes.len(),
            deleted = batch.delete_nodes.len(),
            stale = batch.put_stale.len(),
            "applied jmt batch"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NibblePath, NodeHash};
    use crate::store::StoreConfig;
    use tempfile::tempdir;

    fn root(b: u8) -> RootEntry {
        RootEntry {
            node: Some(NodeKey::new(b as u64, NibblePath::empty())),
            hash: NodeHash::from_bytes([b; 32]),
        }
    }

    fn exercise(store: &dyn JmtStore) {
        let mut batch = JmtBatch::default();
        for v in [1u64, 4, 9] {
            batch.put_roots.push((v, root(v as u8)));
        }
        batch.put_stale.push(StaleEntry {
            stale_since: 4,
            node: NodeKey::new(1, NibblePath::empty()),
        });
        batch.put_stale.push(StaleEntry {
            stale_since: 9,
            node: NodeKey::new(4, NibblePath::empty()),
        });
        batch.min_readable = Some(2);
        store.write(batch).unwrap();

        assert_eq!(store.latest_version().unwrap(), Some(9));
        assert_eq!(store.root_at_or_before(5).unwrap(), Some((4, root(4))));
        assert_eq!(store.root_at_or_before(0).unwrap(), None);
        assert_eq!(store.min_readable_version().unwrap(), 2);
        assert_eq!(store.root_versions_below(9).unwrap(), vec![1, 4]);
        assert_eq!(store.stale_up_to(8).unwrap().len(), 1);
        assert_eq!(store.stale_up_to(9).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryJmtStore::new());
    }

    #[test]
    fn test_rocks_store_skips_pruned_marker() {
        let dir = tempdir().unwrap();
        let db = RocksDb::open(&StoreConfig::new(dir.path()), &JMT_COLUMN_FAMILIES).unwrap();
        let store = RocksJmtStore::open(&db).unwrap();
        exercise(&store);
        // "PRUNED" sorts between small and huge version keys
        assert_eq!(store.root_at_or_before(u64::MAX).unwrap().map(|(v, _)| v), Some(9));
    }

    #[test]
    fn test_rocks_store_requires_column_families() {
        let dir = tempdir().unwrap();
        let db = RocksDb::open(&StoreConfig::new(dir.path()), &[]).unwrap();
        assert!(matches!(RocksJmtStore::open(&db), Err(Error::Config(_))));
    }
}
