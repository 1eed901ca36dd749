//! NodeStore and RootsIndex implemented over any [`KvColumn`]

use super::keys::{decode_u64, SpecialKey, StorageKey};
use super::{ColumnReader, KvColumn, NodeReader, NodeStore, RootsIndex};
use crate::model::NodeHash;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Nodes and their refcounts in one column
pub struct KvNodeStore<C: KvColumn> {
    column: C,
    /// Hashes put since `track_writes`; `None` when not recording
    written: Mutex<Option<HashSet<NodeHash>>>,
}

impl<C: KvColumn> KvNodeStore<C> {
    pub fn new(column: C) -> Self {
        KvNodeStore {
            column,
            written: Mutex::new(None),
        }
    }

    pub fn column(&self) -> &C {
        &self.column
    }
}

impl<C: KvColumn> NodeStore for KvNodeStore<C> {
    fn get(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>> {
        self.column.get(&StorageKey::Node(*hash).encode())
    }

    fn put(&self, hash: &NodeHash, bytes: &[u8]) -> Result<()> {
        // held across the write so a sweep cannot delete between write and record
        let mut written = self.written.lock();
        self.column.put(&StorageKey::Node(*hash).encode(), bytes)?;
        if let Some(written) = written.as_mut() {
            written.insert(*hash);
        }
        Ok(())
    }

    fn delete(&self, hash: &NodeHash) -> Result<()> {
        self.column.delete(&StorageKey::Node(*hash).encode())
    }

    fn refcount(&self, hash: &NodeHash) -> Result<u64> {
        match self.column.get(&StorageKey::Refcount(*hash).encode())? {
            Some(bytes) => decode_u64(&bytes)
                .map_err(|_| Error::Corruption(format!("refcount of {} is {} bytes", hash, bytes.len()))),
            None => Ok(0),
        }
    }

    fn set_refcount(&self, hash: &NodeHash, count: u64) -> Result<()> {
        let key = StorageKey::Refcount(*hash).encode();
        if count == 0 {
            self.column.delete(&key)
        } else {
            self.column.put(&key, &count.to_be_bytes())
        }
    }

    fn for_each_node(&self, visit: &mut dyn FnMut(NodeHash) -> Result<()>) -> Result<()> {
        self.column.scan(&[], &mut |key, _| {
            match StorageKey::decode_node_cf(key)? {
                StorageKey::Node(hash) => visit(hash)?,
                StorageKey::Refcount(_) => {}
                other => {
                    return Err(Error::Corruption(format!(
                        "unexpected key {:?} in nodes column",
                        other
                    )))
                }
            }
            Ok(true)
        })
    }

    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.column.with_batch(work)
    }

    fn snapshot(&self) -> Result<Box<dyn NodeReader + '_>> {
        Ok(Box::new(SnapshotNodes {
            reader: self.column.snapshot()?,
        }))
    }

    fn track_writes(&self) -> Result<()> {
        let mut written = self.written.lock();
        if written.is_some() {
            return Err(Error::Policy("node writes are already being recorded".into()));
        }
        let mut seeded = HashSet::new();
        for key in self.column.staged_puts() {
            if let Ok(StorageKey::Node(hash)) = StorageKey::decode_node_cf(&key) {
                seeded.insert(hash);
            }
        }
        debug!(staged = seeded.len(), "recording node writes");
        *written = Some(seeded);
        Ok(())
    }

    fn untrack_writes(&self) {
        *self.written.lock() = None;
    }

    fn was_written(&self, hash: &NodeHash) -> bool {
        self.written
            .lock()
            .as_ref()
            .map_or(false, |written| written.contains(hash))
    }

    fn delete_unwritten(&self, hashes: &[NodeHash]) -> Result<u64> {
        let written = self.written.lock();
        let doomed: Vec<&NodeHash> = hashes
            .iter()
            .filter(|h| written.as_ref().map_or(true, |w| !w.contains(*h)))
            .collect();
        self.column.with_batch(&mut || {
            for hash in &doomed {
                self.column.delete(&StorageKey::Node(**hash).encode())?;
                self.column.delete(&StorageKey::Refcount(**hash).encode())?;
            }
            Ok(())
        })?;
        Ok(doomed.len() as u64)
    }
}

struct SnapshotNodes<'a> {
    reader: Box<dyn ColumnReader + 'a>,
}

impl<'a> NodeReader for SnapshotNodes<'a> {
    fn read(&self, hash: &NodeHash) -> Result<Option<Vec<u8>>> {
        self.reader.get(&StorageKey::Node(*hash).encode())
    }
}

/// Version → root mapping, counted markers and the singleton keys
pub struct KvRootsIndex<C: KvColumn> {
    column: C,
}

impl<C: KvColumn> KvRootsIndex<C> {
    pub fn new(column: C) -> Self {
        KvRootsIndex { column }
    }

    pub fn column(&self) -> &C {
        &self.column
    }

    fn read_hash(&self, key: StorageKey) -> Result<Option<NodeHash>> {
        match self.column.get(&key.encode())? {
            Some(bytes) => Ok(Some(NodeHash::from_slice(&bytes).map_err(|_| {
                Error::Corruption(format!("root under {:?} is {} bytes", key, bytes.len()))
            })?)),
            None => Ok(None),
        }
    }
}

impl<C: KvColumn> RootsIndex for KvRootsIndex<C> {
    fn next_version(&self) -> Result<u64> {
        let next = match self.last_version()? {
            Some(v) => v
                .checked_add(1)
                .ok_or_else(|| Error::Corruption("version counter exhausted".into()))?,
            None => 0,
        };
        self.column.put(
            &StorageKey::Special(SpecialKey::LastVersion).encode(),
            &next.to_be_bytes(),
        )?;
        Ok(next)
    }

    fn put(&self, version: u64, root: &NodeHash) -> Result<()> {
        self.column
            .put(&StorageKey::Version(version).encode(), root.as_bytes())?;

        let last = self.last_version()?;
        if last.map_or(true, |l| version >= l) {
            self.column.put(
                &StorageKey::Special(SpecialKey::Latest).encode(),
                root.as_bytes(),
            )?;
        }
        if last.map_or(true, |l| version > l) {
            self.column.put(
                &StorageKey::Special(SpecialKey::LastVersion).encode(),
                &version.to_be_bytes(),
            )?;
        }
        debug!(version, root = %root, "recorded root");
        Ok(())
    }

    fn get(&self, version: u64) -> Result<Option<NodeHash>> {
        self.read_hash(StorageKey::Version(version))
    }

    fn latest(&self) -> Result<Option<NodeHash>> {
        self.read_hash(StorageKey::Special(SpecialKey::Latest))
    }

    fn last_version(&self) -> Result<Option<u64>> {
        match self
            .column
            .get(&StorageKey::Special(SpecialKey::LastVersion).encode())?
        {
            Some(bytes) => Ok(Some(decode_u64(&bytes).map_err(|_| {
                Error::Corruption("VERSION entry is not a u64".into())
            })?)),
            None => Ok(None),
        }
    }

    fn list_range(&self, from: u64, to: u64) -> Result<BTreeMap<u64, NodeHash>> {
        let mut out = BTreeMap::new();
        if from > to {
            return Ok(out);
        }
        self.column
            .scan(&StorageKey::Version(from).encode(), &mut |key, value| {
                // special keys are not 8 bytes long; skip them
                let version = match StorageKey::decode_roots_cf(key) {
                    Ok(StorageKey::Version(v)) => v,
                    _ => return Ok(true),
                };
                if version > to {
                    return Ok(false);
                }
                out.insert(version, NodeHash::from_slice(value)?);
                Ok(true)
            })?;
        Ok(out)
    }

    fn delete_version(&self, version: u64) -> Result<()> {
        self.column.delete(&StorageKey::Version(version).encode())?;
        self.column.delete(&StorageKey::Counted(version).encode())
    }

    fn set_counted(&self, version: u64, counted: bool) -> Result<()> {
        let key = StorageKey::Counted(version).encode();
        if counted {
            self.column.put(&key, &[])
        } else {
            self.column.delete(&key)
        }
    }

    fn is_counted(&self, version: u64) -> Result<bool> {
        Ok(self
            .column
            .get(&StorageKey::Counted(version).encode())?
            .is_some())
    }

    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.column.with_batch(work)
    }
}
