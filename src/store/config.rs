//! On-disk store configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the database path
pub const ENV_DB_PATH: &str = "FORESTRY_DB_PATH";
/// Environment variable toggling creation of missing databases and column families
pub const ENV_DB_CREATE: &str = "FORESTRY_DB_CREATE";

/// How versions are kept; fixed when a namespace is first opened
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Every commit gets a new version and counts references to its nodes
    #[default]
    MultiVersion,
    /// Only the current root is kept, at version 0; old nodes go by mark-sweep
    SingleVersion,
}

impl StorageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::MultiVersion => "multi_version",
            StorageMode::SingleVersion => "single_version",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [StorageMode::MultiVersion, StorageMode::SingleVersion]
            .into_iter()
            .find(|m| m.as_str() == s)
    }
}

/// Isolation of one tree from others in the same database
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// The configured column family names, unprefixed keys
    #[default]
    Shared,
    /// Column families of their own, named `<cf>_<name>`
    ColumnFamily(String),
    /// The shared column families, with every key behind this byte
    ///
    /// A database mixes prefixed namespaces with each other only; the
    /// unprefixed shared namespace would see their keys.
    KeyPrefix(u8),
}

/// Configuration for the RocksDB-backed store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory
    pub path: PathBuf,
    /// Create the database directory if absent
    pub create_if_missing: bool,
    /// Create absent column families; when false, opening fails if one is missing
    pub create_missing_column_families: bool,
    pub max_open_files: i32,
    /// Write buffer size in bytes
    pub write_buffer_size: usize,
    /// Block cache size in bytes
    pub block_cache_size: usize,
    pub enable_compression: bool,
    /// Column family holding node bytes and refcounts
    pub nodes_cf: String,
    /// Column family holding the version → root index
    pub roots_cf: String,
    pub namespace: Namespace,
    /// Checked against, or on first open recorded in, the roots column family
    pub storage_mode: StorageMode,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("./forestry_db"),
            create_if_missing: true,
            create_missing_column_families: true,
            max_open_files: 1000,
            write_buffer_size: 64 * 1024 * 1024,
            block_cache_size: 128 * 1024 * 1024,
            enable_compression: true,
            nodes_cf: "nodes".to_string(),
            roots_cf: "roots".to_string(),
            namespace: Namespace::Shared,
            storage_mode: StorageMode::MultiVersion,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Physical name of column family `base` in this namespace
    pub fn cf_name(&self, base: &str) -> String {
        match &self.namespace {
            Namespace::ColumnFamily(name) => format!("{}_{}", base, name),
            Namespace::Shared | Namespace::KeyPrefix(_) => base.to_string(),
        }
    }

    pub fn key_prefix(&self) -> Option<u8> {
        match self.namespace {
            Namespace::KeyPrefix(prefix) => Some(prefix),
            _ => None,
        }
    }

    /// Defaults overridden by `FORESTRY_DB_PATH` and `FORESTRY_DB_CREATE`
    pub fn from_env() -> Result<Self> {
        let mut config = StoreConfig::default();
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            config.path = PathBuf::from(path);
        }
        if let Ok(flag) = std::env::var(ENV_DB_CREATE) {
            let create = parse_flag(&flag)
                .ok_or_else(|| Error::Config(format!("{}={:?} is not a boolean", ENV_DB_CREATE, flag)))?;
            config.create_if_missing = create;
            config.create_missing_column_families = create;
        }
        Ok(config)
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn load(file: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(file)?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save(&self, file: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(file, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes_cf.is_empty() || self.roots_cf.is_empty() {
            return Err(Error::Config("column family names must not be empty".into()));
        }
        if self.nodes_cf == self.roots_cf {
            return Err(Error::Config(format!(
                "nodes and roots share column family {:?}",
                self.nodes_cf
            )));
        }
        if let Namespace::ColumnFamily(name) = &self.namespace {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                return Err(Error::Config(format!("invalid namespace name {:?}", name)));
            }
        }
        Ok(())
    }

    /// Database-wide RocksDB options
    pub fn to_options(&self) -> rocksdb::Options {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(self.create_if_missing);
        opts.create_missing_column_families(self.create_missing_column_families);
        opts.set_max_open_files(self.max_open_files);
        opts.set_write_buffer_size(self.write_buffer_size);
        if self.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        } else {
            opts.set_compression_type(rocksdb::DBCompressionType::None);
        }

        let cache = rocksdb::Cache::new_lru_cache(self.block_cache_size);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        block_opts.set_block_size(16 * 1024);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_json_roundtrip_with_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("store.json");
        let config = StoreConfig::new(dir.path().join("db"));
        config.save(&file).unwrap();
        assert_eq!(StoreConfig::load(&file).unwrap(), config);

        std::fs::write(&file, r#"{"path": "/tmp/x", "max_open_files": 16}"#).unwrap();
        let partial = StoreConfig::load(&file).unwrap();
        assert_eq!(partial.max_open_files, 16);
        assert_eq!(partial.nodes_cf, "nodes");
    }

    #[test]
    fn test_validate_rejects_shared_column_family() {
        let config = StoreConfig {
            roots_cf: "nodes".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_namespace_column_family_names() {
        let shared = StoreConfig::default();
        assert_eq!(shared.cf_name("nodes"), "nodes");
        assert_eq!(shared.key_prefix(), None);

        let own = StoreConfig::default().with_namespace(Namespace::ColumnFamily("accounts".into()));
        assert_eq!(own.cf_name("nodes"), "nodes_accounts");
        assert_eq!(own.cf_name("jmt_stale"), "jmt_stale_accounts");

        let prefixed = StoreConfig::default().with_namespace(Namespace::KeyPrefix(7));
        assert_eq!(prefixed.cf_name("roots"), "roots");
        assert_eq!(prefixed.key_prefix(), Some(7));

        let bad = StoreConfig::default().with_namespace(Namespace::ColumnFamily("a b".into()));
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_storage_mode_names() {
        for mode in [StorageMode::MultiVersion, StorageMode::SingleVersion] {
            assert_eq!(StorageMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(StorageMode::parse("MULTI"), None);

        let json = r#"{"storage_mode": "single_version", "namespace": {"key_prefix": 2}}"#;
        let config: StoreConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.storage_mode, StorageMode::SingleVersion);
        assert_eq!(config.namespace, Namespace::KeyPrefix(2));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
