//! In-memory columns backed by ordered maps
//!
//! Columns taken from one [`MemoryDb`] share a staging area, so a batch opened
//! through any of them captures writes to all of them and applies them under
//! a single lock, the same way columns of one RocksDB handle do.

use super::batch::{CfKey, Staging};
use super::{ColumnReader, KvColumn};
use crate::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// A set of named in-memory columns; clones share the same data
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Inner>,
}

struct Inner {
    columns: RwLock<HashMap<String, Map>>,
    staging: Staging<CfKey>,
}

impl Default for Inner {
    fn default() -> Self {
        Inner {
            columns: RwLock::new(HashMap::new()),
            staging: Staging::new(),
        }
    }
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// The column called `name`, created empty on first use
    pub fn column(&self, name: &str) -> MemoryColumn {
        self.inner
            .columns
            .write()
            .entry(name.to_string())
            .or_default();
        MemoryColumn {
            db: self.clone(),
            name: name.to_string(),
        }
    }
}

/// One ordered column of a [`MemoryDb`]
#[derive(Clone)]
pub struct MemoryColumn {
    db: MemoryDb,
    name: String,
}

impl Default for MemoryColumn {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryColumn {
    /// A standalone column with its own database
    pub fn new() -> Self {
        MemoryDb::new().column("default")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db(&self) -> &MemoryDb {
        &self.db
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.read_map(|map| map.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn staged_key(&self, key: &[u8]) -> CfKey {
        (self.name.clone(), key.to_vec())
    }

    fn read_map<T>(&self, f: impl FnOnce(&Map) -> T) -> T {
        let columns = self.db.inner.columns.read();
        match columns.get(&self.name) {
            Some(map) => f(map),
            None => f(&Map::new()),
        }
    }

    fn write_map<T>(&self, f: impl FnOnce(&mut Map) -> T) -> T {
        let mut columns = self.db.inner.columns.write();
        f(columns.entry(self.name.clone()).or_default())
    }
}

impl KvColumn for MemoryColumn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.db.inner.staging.lookup(&self.staged_key(key)) {
            return Ok(staged);
        }
        Ok(self.read_map(|map| map.get(key).cloned()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self
            .db
            .inner
            .staging
            .stage(self.staged_key(key), Some(value.to_vec()))
        {
            self.write_map(|map| map.insert(key.to_vec(), value.to_vec()));
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        if !self.db.inner.staging.stage(self.staged_key(key), None) {
            self.write_map(|map| map.remove(key));
        }
        Ok(())
    }

    fn scan(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        // copy out so `visit` may write back to this column
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self.read_map(|map| {
            map.range(from.to_vec()..)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });
        for (k, v) in entries {
            if !visit(&k, &v)? {
                break;
            }
        }
        Ok(())
    }

    fn scan_rev(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = self.read_map(|map| {
            map.range(..=from.to_vec())
                .rev()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        });
        for (k, v) in entries {
            if !visit(&k, &v)? {
                break;
            }
        }
        Ok(())
    }

    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.db.inner.staging.run(work, |writes| {
            let mut columns = self.db.inner.columns.write();
            for ((column, key), value) in writes {
                let map = columns.entry(column).or_default();
                match value {
                    Some(v) => map.insert(key, v),
                    None => map.remove(&key),
                };
            }
            Ok(())
        })
    }

    fn staged_puts(&self) -> Vec<Vec<u8>> {
        self.db
            .inner
            .staging
            .pending_puts()
            .into_iter()
            .filter(|(column, _)| *column == self.name)
            .map(|(_, key)| key)
            .collect()
    }

    fn snapshot(&self) -> Result<Box<dyn ColumnReader + '_>> {
        Ok(Box::new(MapSnapshot {
            map: self.read_map(|map| map.clone()),
        }))
    }
}

struct MapSnapshot {
    map: Map,
}

impl ColumnReader for MapSnapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }
}
