//! High-level state trees API
//!
//! [`StateTrees`] owns one RocksDB database holding the node store, the roots
//! index and the jellyfish tree column families, and ties tree edits to
//! version records so a commit lands in a single atomic write.
//!
//! The [`StorageMode`] of the namespace decides what a commit records. In
//! multi-version mode every commit takes the next version and counts the
//! references of its root, so any retained history can be collected by
//! reference counting. In single-version mode a commit overwrites version 0
//! and old nodes are removed with [`StateTrees::cleanup_orphaned_nodes`].

use crate::gc::{GcManager, GcOptions, GcReport, GcStrategy, RetentionPolicy};
use crate::jmt::{JellyfishMerkleTree, RocksJmtStore, JMT_COLUMN_FAMILIES};
use crate::model::{Blake2b256, Hasher, NodeHash};
use crate::store::{
    in_batch, NodeStore, RocksDb, RocksNodeStore, RocksRootsIndex, RootsIndex, StorageMode, StoreConfig,
};
use crate::trie::SecureTrie;
use crate::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// The main database interface
///
/// Provides:
/// - secure tries over the shared node store, read at any recorded version
/// - commits that record a root atomically with its nodes, per storage mode
/// - reference counting at commit time, and garbage collection
/// - a jellyfish tree for versioned batch updates
pub struct StateTrees {
    db: RocksDb,
    nodes: RocksNodeStore,
    roots: RocksRootsIndex,
    jmt: RocksJmtStore,
    hasher: Arc<dyn Hasher>,
}

impl StateTrees {
    /// Open (or create, per `config`) the database
    ///
    /// Fails with `Config` when the namespace was created in another storage mode.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db = RocksDb::open(config, &JMT_COLUMN_FAMILIES)?;
        let nodes = RocksNodeStore::new(db.nodes_column()?);
        let roots = RocksRootsIndex::new(db.roots_column()?);
        let jmt = RocksJmtStore::open(&db)?;
        Ok(StateTrees {
            db,
            nodes,
            roots,
            jmt,
            hasher: Arc::new(Blake2b256),
        })
    }

    /// Open with default settings at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(&StoreConfig::new(path.as_ref()))
    }

    /// Hash function for keys and commitments of every tree handed out
    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        self.db.config()
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.db.storage_mode()
    }

    fn require_mode(&self, required: StorageMode) -> Result<()> {
        let actual = self.storage_mode();
        if actual != required {
            return Err(Error::WrongStorageMode { required, actual });
        }
        Ok(())
    }

    pub fn node_store(&self) -> &RocksNodeStore {
        &self.nodes
    }

    pub fn roots_index(&self) -> &RocksRootsIndex {
        &self.roots
    }

    // === Tries ===

    /// A trie starting at `root`; the null hash gives an empty trie
    pub fn secure_trie(&self, root: NodeHash) -> SecureTrie<'_> {
        SecureTrie::with_root(&self.nodes, root).with_hasher(self.hasher.clone())
    }

    /// Root of the single kept version
    pub fn current_root(&self) -> Result<Option<NodeHash>> {
        self.require_mode(StorageMode::SingleVersion)?;
        self.roots.get(0)
    }

    /// The trie at the most recent version, empty before the first commit
    pub fn latest_trie(&self) -> Result<SecureTrie<'_>> {
        let root = self.roots.latest()?.unwrap_or(NodeHash::ZERO);
        Ok(self.secure_trie(root))
    }

    /// The trie recorded under `version`
    ///
    /// Before the first commit every version reads as the empty trie.
    pub fn trie_at(&self, version: u64) -> Result<SecureTrie<'_>> {
        if let Some(root) = self.roots.get(version)? {
            return Ok(self.secure_trie(root));
        }
        match self.roots.last_version()? {
            None => Ok(self.secure_trie(NodeHash::ZERO)),
            Some(latest) if version <= latest => Err(Error::VersionPruned(version)),
            Some(latest) => Err(Error::VersionConflict {
                latest,
                requested: version,
            }),
        }
    }

    // === Commits ===

    /// Record the trie's root; returns its version
    pub fn commit(&self, trie: &SecureTrie<'_>) -> Result<u64> {
        self.commit_root(&trie.root_hash())
    }

    /// Record `root` under the next version, or over version 0 in single-version mode
    pub fn commit_root(&self, root: &NodeHash) -> Result<u64> {
        let version = in_batch(&self.nodes, || self.record(root))?;
        info!(version, root = %root.short(), "committed");
        Ok(version)
    }

    /// Edit the latest trie and commit the result
    ///
    /// Node writes of the edit and the new version share one atomic batch;
    /// when `edit` fails nothing is written.
    pub fn update<F>(&self, edit: F) -> Result<(u64, NodeHash)>
    where
        F: FnOnce(&mut SecureTrie<'_>) -> Result<()>,
    {
        let (version, root) = in_batch(&self.nodes, || {
            let mut trie = self.latest_trie()?;
            edit(&mut trie)?;
            let root = trie.root_hash();
            Ok((self.record(&root)?, root))
        })?;
        info!(version, root = %root.short(), "committed update");
        Ok((version, root))
    }

    /// Commit `root` with its references counted; multi-version mode only
    pub fn commit_with_refcount(&self, root: &NodeHash) -> Result<u64> {
        self.require_mode(StorageMode::MultiVersion)?;
        self.commit_root(root)
    }

    fn record(&self, root: &NodeHash) -> Result<u64> {
        match self.storage_mode() {
            StorageMode::MultiVersion => self.gc_manager().record_counted(root),
            StorageMode::SingleVersion => {
                self.roots.put(0, root)?;
                Ok(0)
            }
        }
    }

    // === Maintenance ===

    /// Collector over the trie nodes and roots of this database
    pub fn gc_manager(&self) -> GcManager<'_> {
        GcManager::new(&self.nodes, &self.roots)
    }

    /// Delete every node the current root cannot reach; single-version mode only
    ///
    /// Marks on disk, so memory use does not grow with the tree.
    pub fn cleanup_orphaned_nodes(&self, options: &GcOptions) -> Result<GcReport> {
        self.require_mode(StorageMode::SingleVersion)?;
        self.gc_manager()
            .run(GcStrategy::OnDiskMarkSweep, &RetentionPolicy::KeepLatest(1), options)
    }

    /// Versioned jellyfish tree in its own column families
    pub fn jmt(&self) -> JellyfishMerkleTree<'_, RocksJmtStore> {
        JellyfishMerkleTree::new(&self.jmt).with_hasher(self.hasher.clone())
    }

    /// Number of stored trie nodes
    pub fn node_count(&self) -> Result<u64> {
        self.nodes.node_count()
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Blake3;
    use crate::store::Namespace;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn test_open_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state");

        let root = {
            let trees = StateTrees::open_path(&path).unwrap();
            let (version, root) = trees
                .update(|trie| {
                    trie.put(b"mango", b"100")?;
                    trie.put(b"apple", b"200")
                })
                .unwrap();
            assert_eq!(version, 0);
            trees.flush().unwrap();
            root
        };

        let trees = StateTrees::open_path(&path).unwrap();
        assert_eq!(trees.roots_index().latest().unwrap(), Some(root));
        let trie = trees.latest_trie().unwrap();
        assert_eq!(trie.get(b"apple").unwrap(), Some(b"200".to_vec()));
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path()).unwrap();

        let result = trees.update(|trie| {
            trie.put(b"mango", b"100")?;
            Err(Error::Policy("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(trees.node_count().unwrap(), 0);
        assert_eq!(trees.roots_index().last_version().unwrap(), None);
    }

    #[test]
    fn test_trie_at_versions() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path()).unwrap();
        assert!(trees.trie_at(3).unwrap().is_empty());

        trees.update(|trie| trie.put(b"k", b"1")).unwrap();
        trees.update(|trie| trie.put(b"k", b"2")).unwrap();

        assert_eq!(trees.trie_at(0).unwrap().get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(trees.trie_at(1).unwrap().get(b"k").unwrap(), Some(b"2".to_vec()));
        assert!(matches!(
            trees.trie_at(5),
            Err(Error::VersionConflict { latest: 1, requested: 5 })
        ));

        trees.roots_index().delete_version(0).unwrap();
        assert!(matches!(trees.trie_at(0), Err(Error::VersionPruned(0))));
    }

    #[test]
    fn test_commit_with_refcount_then_collect() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path()).unwrap();

        let mut trie = trees.latest_trie().unwrap();
        for i in 0..3u8 {
            trie.put(b"stable", b"same").unwrap();
            trie.put(b"counter", &[i]).unwrap();
            trees.commit_with_refcount(&trie.root_hash()).unwrap();
        }
        let latest = trie.root_hash();
        assert_eq!(trees.node_store().refcount(&latest).unwrap(), 1);

        let report = trees
            .gc_manager()
            .run(GcStrategy::Refcount, &RetentionPolicy::KeepLatest(1), &GcOptions::default())
            .unwrap();
        assert!(report.deleted > 0);
        let trie = trees.latest_trie().unwrap();
        assert_eq!(trie.get(b"counter").unwrap(), Some(vec![2]));
        assert_eq!(trie.get(b"stable").unwrap(), Some(b"same".to_vec()));
    }

    #[test]
    fn test_every_commit_path_is_counted() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path()).unwrap();

        let mut trie = trees.latest_trie().unwrap();
        for i in 0..10u8 {
            trie.put(&[i], b"base").unwrap();
        }
        trees.commit_with_refcount(&trie.root_hash()).unwrap();
        // later versions reuse the counted nodes through the other commit paths
        trees.update(|trie| trie.put(&[0], b"edited")).unwrap();
        let mut trie = trees.latest_trie().unwrap();
        trie.put(&[1], b"edited").unwrap();
        trees.commit(&trie).unwrap();
        trie.put(&[2], b"edited").unwrap();
        trees.commit_root(&trie.root_hash()).unwrap();
        for version in 0..4 {
            assert!(trees.roots_index().is_counted(version).unwrap());
        }

        let report = trees
            .gc_manager()
            .run(GcStrategy::Refcount, &RetentionPolicy::KeepLatest(1), &GcOptions::default())
            .unwrap();
        assert!(report.deleted > 0);
        let latest = trees.latest_trie().unwrap();
        for i in 0..10u8 {
            let expected: &[u8] = if i < 3 { b"edited" } else { b"base" };
            assert_eq!(latest.get(&[i]).unwrap(), Some(expected.to_vec()));
        }
    }

    #[test]
    fn test_single_version_mode() {
        let dir = tempdir().unwrap();
        let config = StoreConfig::new(dir.path()).with_storage_mode(StorageMode::SingleVersion);
        let trees = StateTrees::open(&config).unwrap();
        assert_eq!(trees.current_root().unwrap(), None);

        for v in 0..3u8 {
            let (version, root) = trees
                .update(|trie| {
                    trie.put(b"stable", b"same")?;
                    trie.put(b"moving", &[v])
                })
                .unwrap();
            assert_eq!(version, 0);
            assert_eq!(trees.current_root().unwrap(), Some(root));
        }
        assert!(!trees.roots_index().is_counted(0).unwrap());
        assert!(matches!(
            trees.commit_with_refcount(&NodeHash::ZERO),
            Err(Error::WrongStorageMode {
                required: StorageMode::MultiVersion,
                actual: StorageMode::SingleVersion,
            })
        ));

        let report = trees.cleanup_orphaned_nodes(&GcOptions::default()).unwrap();
        assert!(report.deleted > 0);
        assert_eq!(trees.node_count().unwrap(), report.marked);
        let trie = trees.latest_trie().unwrap();
        assert_eq!(trie.get(b"moving").unwrap(), Some(vec![2]));
        assert_eq!(trie.get(b"stable").unwrap(), Some(b"same".to_vec()));
    }

    #[test]
    fn test_single_version_operations_need_single_version_mode() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path()).unwrap();
        assert!(matches!(trees.current_root(), Err(Error::WrongStorageMode { .. })));
        assert!(matches!(
            trees.cleanup_orphaned_nodes(&GcOptions::default()),
            Err(Error::WrongStorageMode { .. })
        ));
    }

    #[test]
    fn test_reopen_in_other_mode_fails() {
        let dir = tempdir().unwrap();
        drop(StateTrees::open_path(dir.path()).unwrap());
        let single = StoreConfig::new(dir.path()).with_storage_mode(StorageMode::SingleVersion);
        assert!(matches!(StateTrees::open(&single), Err(Error::Config(_))));
        assert!(StateTrees::open_path(dir.path()).is_ok());
    }

    #[test]
    fn test_namespaces_hold_separate_trees() {
        let dir = tempdir().unwrap();
        for namespace in [Namespace::ColumnFamily("blue".into()), Namespace::KeyPrefix(7)] {
            let other = match &namespace {
                Namespace::ColumnFamily(_) => Namespace::ColumnFamily("green".into()),
                _ => Namespace::KeyPrefix(8),
            };
            let config = StoreConfig::new(dir.path()).with_namespace(namespace);
            {
                let trees = StateTrees::open(&config).unwrap();
                trees.update(|trie| trie.put(b"owner", b"first")).unwrap();
            }
            {
                let trees = StateTrees::open(&config.clone().with_namespace(other)).unwrap();
                assert!(trees.latest_trie().unwrap().is_empty());
                assert_eq!(trees.roots_index().last_version().unwrap(), None);
                trees.update(|trie| trie.put(b"owner", b"second")).unwrap();
            }
            let trees = StateTrees::open(&config).unwrap();
            assert_eq!(trees.roots_index().last_version().unwrap(), Some(0));
            let trie = trees.latest_trie().unwrap();
            assert_eq!(trie.get(b"owner").unwrap(), Some(b"first".to_vec()));
        }
    }

    #[test]
    fn test_jmt_shares_hasher() {
        let dir = tempdir().unwrap();
        let trees = StateTrees::open_path(dir.path())
            .unwrap()
            .with_hasher(Arc::new(Blake3));

        let (_, trie_root) = trees.update(|trie| trie.put(b"mango", b"100")).unwrap();
        let mut updates = BTreeMap::new();
        updates.insert(b"mango".to_vec(), Some(b"100".to_vec()));
        let jmt_root = trees.jmt().commit(1, &updates).unwrap();
        assert_eq!(jmt_root, trie_root);
    }
}
