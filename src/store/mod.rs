//! Storage layer
//!
//! Trees talk to storage only through two contracts:
//! - [`NodeStore`]: content-addressed node bytes keyed by [`NodeHash`], plus
//!   reference counts co-located with the nodes
//! - [`RootsIndex`]: a monotonic version counter and a version → root mapping
//!
//! Both are implemented once over a raw [`KvColumn`], which is either an
//! in-memory ordered map or a RocksDB column family. Columns of one
//! [`MemoryDb`] or one [`RocksDb`] share a staging area, so a
//! [`NodeStore::with_batch`] scope also captures root writes and commits them
//! in the same atomic write.

mod batch;
mod config;
mod keys;
mod kv;
mod memory;
mod rocks;

pub use batch::StagedWrites;
pub use config::{Namespace, StorageMode, StoreConfig};
pub use keys::{decode_u64, SpecialKey, StorageKey, COUNTED_PREFIX, REFCOUNT_PREFIX};
pub use kv::{KvNodeStore, KvRootsIndex};
pub use memory::{MemoryColumn, MemoryDb};
pub use rocks::{RocksColumn, RocksDb};

pub(crate) use batch::Staging;

use crate::model::NodeHash;
use crate::Result;
use std::collections::BTreeMap;

/// In-memory node store, for tests and small trees
pub type MemoryNodeStore = KvNodeStore<MemoryColumn>;
/// In-memory roots index
pub type MemoryRootsIndex = KvRootsIndex<MemoryColumn>;
/// Node store over the RocksDB nodes column family
pub type RocksNodeStore = KvNodeStore<RocksColumn>;
/// Roots index over the RocksDB roots column family
pub type RocksRootsIndex = KvRootsIndex<RocksColumn>;

/// A raw, ordered key/value column
pub trait KvColumn: Send + Sync {
    /// Read a key, observing writes staged by this thread's open batch
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Visit committed entries with `key >= from` in key order until `visit` returns false
    fn scan(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()>;

    /// Visit committed entries with `key <= from` in descending key order until `visit` returns false
    fn scan_rev(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()>;

    /// Stage every write issued by `work` and apply them atomically if it succeeds
    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// Keys with a put staged in an open batch of any thread
    fn staged_puts(&self) -> Vec<Vec<u8>>;

    /// A consistent point-in-time view of the committed contents
    fn snapshot(&self) -> Result<Box<dyn ColumnReader + '_>>;
}

/// Read-only access to a column snapshot
pub trait ColumnReader {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Read-only access to nodes, used by GC marking
pub trait NodeReader {
    fn read(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>>;
}

/// Content-addressed storage of serialized tree nodes
pub trait NodeStore: Send + Sync {
    /// Fetch node bytes; `None` for a hash a live root references means corruption
    fn get(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>>;

    fn put(&self, hash: &NodeHash, bytes: &[u8]) -> Result<()>;

    fn delete(&self, hash: &NodeHash) -> Result<()>;

    fn contains(&self, hash: &NodeHash) -> Result<bool> {
        Ok(self.get(hash)?.is_some())
    }

    /// Reference count of a node (0 when never counted)
    fn refcount(&self, hash: &NodeHash) -> Result<u64>;

    /// Store a reference count; 0 removes the entry
    fn set_refcount(&self, hash: &NodeHash, count: u64) -> Result<()>;

    /// Visit every committed node hash, skipping refcount entries
    fn for_each_node(&self, visit: &mut dyn FnMut(NodeHash) -> Result<()>) -> Result<()>;

    fn node_count(&self) -> Result<u64> {
        let mut count = 0u64;
        self.for_each_node(&mut |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    /// Run `work` with all puts and deletes staged, committing them atomically
    /// when it returns `Ok`; reads inside `work` see the staged writes
    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// A point-in-time reader over committed nodes
    fn snapshot(&self) -> Result<Box<dyn NodeReader + '_>>;

    /// Start recording the hash of every node put from now on
    ///
    /// Puts already staged in open batches count as recorded. Only one
    /// recording runs at a time; a second call fails with `Policy`.
    fn track_writes(&self) -> Result<()>;

    /// Stop recording and forget the recorded hashes
    fn untrack_writes(&self);

    /// Whether `hash` was put since recording started
    fn was_written(&self, hash: &NodeHash) -> bool;

    /// Delete, in one batch, each of `hashes` not put since recording started;
    /// returns how many were deleted
    ///
    /// Puts wait while this runs, so a node cannot be rewritten between the
    /// check and its delete. Refcounts of deleted nodes are dropped too.
    fn delete_unwritten(&self, hashes: &[NodeHash]) -> Result<u64>;
}

/// Monotonic versions and their roots
pub trait RootsIndex: Send + Sync {
    /// Issue a version higher than every version issued before, persisting the counter
    fn next_version(&self) -> Result<u64>;

    /// Record the root of `version`; also moves `latest` when `version` is the highest
    fn put(&self, version: u64, root: &NodeHash) -> Result<()>;

    fn get(&self, version: u64) -> Result<Option<NodeHash>>;

    /// Root of the highest version ever committed, even if since pruned
    fn latest(&self) -> Result<Option<NodeHash>>;

    /// Highest version issued or committed
    fn last_version(&self) -> Result<Option<u64>>;

    /// All retained versions, ascending
    fn list_all(&self) -> Result<BTreeMap<u64, NodeHash>> {
        self.list_range(0, u64::MAX)
    }

    /// Versions in `[from, to]`, ascending; empty when `from > to`
    fn list_range(&self, from: u64, to: u64) -> Result<BTreeMap<u64, NodeHash>>;

    /// Drop the mapping of one version and its counted marker
    fn delete_version(&self, version: u64) -> Result<()>;

    /// Mark whether the nodes of `version` carry reference counts
    fn set_counted(&self, version: u64, counted: bool) -> Result<()>;

    fn is_counted(&self, version: u64) -> Result<bool>;

    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// Run a closure inside a node-store batch and return its value
pub fn in_batch<S, T, F>(store: &S, work: F) -> Result<T>
where
    S: NodeStore + ?Sized,
    F: FnOnce() -> Result<T>,
{
    let mut work = Some(work);
    let mut out = None;
    store.with_batch(&mut || {
        if let Some(f) = work.take() {
            out = Some(f()?);
        }
        Ok(())
    })?;
    out.ok_or_else(|| crate::Error::Corruption("batch work did not run".into()))
}
