//! Error types for forestry_db

use crate::model::NodeHash;
use crate::store::StorageMode;
use thiserror::Error;

/// Result type alias for forestry_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in forestry_db operations
///
/// Proof verification is not an error: verifiers return `false` for a proof
/// that does not recompute to the claimed root.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RocksDB error: {0}")]
    Rocks(#[from] rocksdb::Error),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid nibble: {0}")]
    InvalidNibble(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Malformed proof: {0}")]
    MalformedProof(String),

    /// A node referenced by a live root is absent from the store
    #[error("Missing node {0}: store is corrupt")]
    MissingNode(NodeHash),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Version conflict: latest committed version is {latest}, requested {requested}")]
    VersionConflict { latest: u64, requested: u64 },

    #[error("Version {0} has been pruned")]
    VersionPruned(u64),

    #[error("GC policy violation: {0}")]
    Policy(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Operation requires {required:?} storage, database is {actual:?}")]
    WrongStorageMode { required: StorageMode, actual: StorageMode },
}
