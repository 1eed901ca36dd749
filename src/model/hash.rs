//! Fixed-length node digest used as the content address of every stored node

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every digest produced by a [`Hasher`](super::Hasher)
pub const HASH_LEN: usize = 32;

/// A 32-byte digest identifying a node by its commitment
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeHash([u8; HASH_LEN]);

impl NodeHash {
    /// The null hash: root of the empty trie and filler for empty branch slots
    pub const ZERO: NodeHash = NodeHash([0u8; HASH_LEN]);

    /// Create a hash from raw bytes
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        NodeHash(bytes)
    }

    /// Create a hash from a slice, rejecting anything that is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; HASH_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidHash(format!("expected {} bytes, got {}", HASH_LEN, bytes.len()))
        })?;
        Ok(NodeHash(arr))
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidHash(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Get a short prefix for display
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// Check if this is the null hash
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self.short())
    }
}

impl Default for NodeHash {
    fn default() -> Self {
        NodeHash::ZERO
    }
}

impl AsRef<[u8]> for NodeHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
