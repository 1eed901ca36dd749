//! RocksDB-backed columns
//!
//! One [`RocksDb`] handle owns the database; each [`RocksColumn`] is a view on
//! one column family. All columns of a handle share a single staging area, so a
//! batch opened through any column captures writes to every column and lands
//! in one atomic `WriteBatch`.
//!
//! The configured [`Namespace`](super::Namespace) decides which physical column
//! families a handle uses and whether its columns put a prefix byte in front
//! of every key.

use super::batch::{CfKey, StagedWrites, Staging};
use super::keys::{SpecialKey, StorageKey};
use super::{ColumnReader, KvColumn, StorageMode, StoreConfig};
use crate::{Error, Result};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared handle to an open RocksDB database
#[derive(Clone)]
pub struct RocksDb {
    inner: Arc<RocksInner>,
}

struct RocksInner {
    db: DB,
    config: StoreConfig,
    cf_names: Vec<String>,
    staging: Staging<CfKey>,
}

impl RocksDb {
    /// Open the database with the configured nodes and roots column families
    /// plus `extra_cfs`, all named per the configured namespace
    ///
    /// Column families already present on disk are always opened. When
    /// `create_missing_column_families` is off, a required column family that
    /// does not exist yet is a configuration error. The storage mode of the
    /// namespace is recorded on first open; opening it later in another mode
    /// fails with `Config`.
    pub fn open(config: &StoreConfig, extra_cfs: &[&str]) -> Result<Self> {
        config.validate()?;
        let opts = config.to_options();

        let mut required: Vec<String> = vec![config.cf_name(&config.nodes_cf), config.cf_name(&config.roots_cf)];
        for cf in extra_cfs {
            let name = config.cf_name(cf);
            if !required.contains(&name) {
                required.push(name);
            }
        }

        // fails when the database does not exist yet
        let existing = DB::list_cf(&opts, &config.path).ok();
        if let Some(existing) = &existing {
            if !config.create_missing_column_families {
                if let Some(missing) = required.iter().find(|cf| !existing.contains(cf)) {
                    return Err(Error::Config(format!(
                        "missing column family {:?} in {}",
                        missing,
                        config.path.display()
                    )));
                }
            }
        }

        let mut cf_names = required;
        for cf in existing.into_iter().flatten() {
            if cf != rocksdb::DEFAULT_COLUMN_FAMILY_NAME && !cf_names.contains(&cf) {
                cf_names.push(cf);
            }
        }

        let descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();
        let db = DB::open_cf_descriptors(&opts, &config.path, descriptors)?;

        info!(
            path = %config.path.display(),
            column_families = ?cf_names,
            namespace = ?config.namespace,
            "opened store"
        );

        let handle = RocksDb {
            inner: Arc::new(RocksInner {
                db,
                config: config.clone(),
                cf_names,
                staging: Staging::new(),
            }),
        };
        handle.check_storage_mode()?;
        Ok(handle)
    }

    fn check_storage_mode(&self) -> Result<()> {
        let requested = self.inner.config.storage_mode;
        let roots = self.roots_column()?;
        let key = StorageKey::Special(SpecialKey::Mode).encode();
        match roots.get(&key)? {
            Some(bytes) => {
                let stored = std::str::from_utf8(&bytes)
                    .ok()
                    .and_then(StorageMode::parse)
                    .ok_or_else(|| Error::Corruption("MODE entry is not a storage mode".into()))?;
                if stored != requested {
                    return Err(Error::Config(format!(
                        "storage mode mismatch: namespace was created as {} but opened as {}",
                        stored.as_str(),
                        requested.as_str()
                    )));
                }
            }
            None => roots.put(&key, requested.as_str().as_bytes())?,
        }
        Ok(())
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.inner.config.storage_mode
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// A view on column family `name` of this handle's namespace
    pub fn column(&self, name: &str) -> Result<RocksColumn> {
        let cf = self.inner.config.cf_name(name);
        self.cf_handle(&cf)?;
        Ok(RocksColumn {
            db: self.clone(),
            cf,
            prefix: self.inner.config.key_prefix(),
        })
    }

    pub fn nodes_column(&self) -> Result<RocksColumn> {
        self.column(&self.inner.config.nodes_cf)
    }

    pub fn roots_column(&self) -> Result<RocksColumn> {
        self.column(&self.inner.config.roots_cf)
    }

    /// Apply writes to any column families as one atomic batch
    pub fn write(&self, writes: StagedWrites<CfKey>) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        for ((cf, key), value) in &writes {
            let handle = self.cf_handle(cf)?;
            match value {
                Some(v) => batch.put_cf(handle, key, v),
                None => batch.delete_cf(handle, key),
            }
        }
        self.inner.db.write(batch)?;
        debug!(writes = writes.len(), "applied write batch");
        Ok(())
    }

    /// Flush memtables of every open column family to disk
    pub fn flush(&self) -> Result<()> {
        for name in &self.inner.cf_names {
            self.inner.db.flush_cf(self.cf_handle(name)?)?;
        }
        Ok(())
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.inner
            .db
            .cf_handle(name)
            .ok_or_else(|| Error::Config(format!("missing column family {:?}", name)))
    }
}

/// One column family of a [`RocksDb`], seen through its namespace
#[derive(Clone)]
pub struct RocksColumn {
    db: RocksDb,
    cf: String,
    prefix: Option<u8>,
}

impl RocksColumn {
    /// Physical column family name
    pub fn name(&self) -> &str {
        &self.cf
    }

    pub fn db(&self) -> &RocksDb {
        &self.db
    }

    fn raw_key(&self, key: &[u8]) -> Vec<u8> {
        match self.prefix {
            Some(p) => {
                let mut out = Vec::with_capacity(key.len() + 1);
                out.push(p);
                out.extend_from_slice(key);
                out
            }
            None => key.to_vec(),
        }
    }

    /// The namespace-relative key, or `None` for a key of another namespace
    fn local_key<'k>(&self, raw: &'k [u8]) -> Option<&'k [u8]> {
        match self.prefix {
            Some(p) => match raw.split_first() {
                Some((first, rest)) if *first == p => Some(rest),
                _ => None,
            },
            None => Some(raw),
        }
    }

    fn staged_key(&self, key: &[u8]) -> CfKey {
        (self.cf.clone(), self.raw_key(key))
    }

    fn iterate(
        &self,
        from: &[u8],
        direction: Direction,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>,
    ) -> Result<()> {
        let handle = self.db.cf_handle(&self.cf)?;
        let start = self.raw_key(from);
        let iter = self
            .db
            .inner
            .db
            .iterator_cf(handle, IteratorMode::From(&start, direction));
        for item in iter {
            let (key, value) = item?;
            let local = match self.local_key(&key) {
                Some(local) => local,
                // left this namespace's prefix range
                None => break,
            };
            if !visit(local, &value)? {
                break;
            }
        }
        Ok(())
    }
}

impl KvColumn for RocksColumn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.db.inner.staging.lookup(&self.staged_key(key)) {
            return Ok(staged);
        }
        let handle = self.db.cf_handle(&self.cf)?;
        Ok(self.db.inner.db.get_cf(handle, self.raw_key(key))?)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self
            .db
            .inner
            .staging
            .stage(self.staged_key(key), Some(value.to_vec()))
        {
            let handle = self.db.cf_handle(&self.cf)?;
            self.db.inner.db.put_cf(handle, self.raw_key(key), value)?;
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        if !self.db.inner.staging.stage(self.staged_key(key), None) {
            let handle = self.db.cf_handle(&self.cf)?;
            self.db.inner.db.delete_cf(handle, self.raw_key(key))?;
        }
        Ok(())
    }

    fn scan(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        self.iterate(from, Direction::Forward, visit)
    }

    fn scan_rev(&self, from: &[u8], visit: &mut dyn FnMut(&[u8], &[u8]) -> Result<bool>) -> Result<()> {
        self.iterate(from, Direction::Reverse, visit)
    }

    fn with_batch(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.db.inner.staging.run(work, |writes| self.db.write(writes))
    }

    fn staged_puts(&self) -> Vec<Vec<u8>> {
        self.db
            .inner
            .staging
            .pending_puts()
            .into_iter()
            .filter(|(cf, _)| *cf == self.cf)
            .filter_map(|(_, key)| self.local_key(&key).map(|k| k.to_vec()))
            .collect()
    }

    fn snapshot(&self) -> Result<Box<dyn ColumnReader + '_>> {
        let handle = self.db.cf_handle(&self.cf)?;
        Ok(Box::new(RocksSnapshot {
            snapshot: self.db.inner.db.snapshot(),
            handle,
            column: self,
        }))
    }
}

struct RocksSnapshot<'a> {
    snapshot: rocksdb::Snapshot<'a>,
    handle: &'a rocksdb::ColumnFamily,
    column: &'a RocksColumn,
}

impl<'a> ColumnReader for RocksSnapshot<'a> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get_cf(self.handle, self.column.raw_key(key))?)
    }
}
