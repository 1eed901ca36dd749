//! Typed storage keys sharing the byte-string key space of the backing store
//!
//! ```text
//! nodes CF:  hash (32 bytes)               node bytes
//!            0xF0 ‖ hash (33 bytes)        refcount (u64 BE)
//! roots CF:  version (u64 BE, 8 bytes)     root hash
//!            "LATEST"                      root of the highest committed version
//!            "VERSION"                     highest issued version (u64 BE)
//!            "PRUNED"                      lowest readable version (u64 BE)
//!            "MODE"                        storage mode name
//!            0xC0 ‖ version (9 bytes)      empty; the version's references are counted
//! ```
//!
//! Under a key-prefix namespace every key above sits behind the prefix byte.

use crate::model::{NodeHash, HASH_LEN};
use crate::{Error, Result};

/// Reserved first byte of refcount entries in the nodes column family
pub const REFCOUNT_PREFIX: u8 = 0xF0;
/// Reserved first byte of counted-version markers in the roots column family
pub const COUNTED_PREFIX: u8 = 0xC0;

/// Reserved singleton keys of the roots column family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialKey {
    Latest,
    LastVersion,
    /// Lowest version still readable after pruning
    Pruned,
    /// Storage mode the namespace was created with
    Mode,
}

impl SpecialKey {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            SpecialKey::Latest => b"LATEST",
            SpecialKey::LastVersion => b"VERSION",
            SpecialKey::Pruned => b"PRUNED",
            SpecialKey::Mode => b"MODE",
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        [
            SpecialKey::Latest,
            SpecialKey::LastVersion,
            SpecialKey::Pruned,
            SpecialKey::Mode,
        ]
            .into_iter()
            .find(|k| k.as_bytes() == bytes)
    }
}

/// A key in one of the store's column families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Node(NodeHash),
    Refcount(NodeHash),
    Version(u64),
    /// Marker of a version committed with reference counting
    Counted(u64),
    Special(SpecialKey),
}

impl StorageKey {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            StorageKey::Node(hash) => hash.as_bytes().to_vec(),
            StorageKey::Refcount(hash) => {
                let mut out = Vec::with_capacity(HASH_LEN + 1);
                out.push(REFCOUNT_PREFIX);
                out.extend_from_slice(hash.as_bytes());
                out
            }
            StorageKey::Version(v) => v.to_be_bytes().to_vec(),
            StorageKey::Counted(v) => {
                let mut out = Vec::with_capacity(9);
                out.push(COUNTED_PREFIX);
                out.extend_from_slice(&v.to_be_bytes());
                out
            }
            StorageKey::Special(s) => s.as_bytes().to_vec(),
        }
    }

    /// Classify a raw key read from the nodes column family
    pub fn decode_node_cf(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            HASH_LEN => Ok(StorageKey::Node(NodeHash::from_slice(bytes)?)),
            n if n == HASH_LEN + 1 => {
                if bytes[0] != REFCOUNT_PREFIX {
                    return Err(Error::InvalidKey(format!(
                        "unknown key prefix 0x{:02x}",
                        bytes[0]
                    )));
                }
                Ok(StorageKey::Refcount(fixed_hash(&bytes[1..])?))
            }
            n => Err(Error::InvalidKey(format!("{}-byte key in nodes column family", n))),
        }
    }

    /// Classify a raw key read from the roots column family
    pub fn decode_roots_cf(bytes: &[u8]) -> Result<Self> {
        if let Some(special) = SpecialKey::from_bytes(bytes) {
            return Ok(StorageKey::Special(special));
        }
        if bytes.len() == 9 && bytes[0] == COUNTED_PREFIX {
            return Ok(StorageKey::Counted(decode_u64(&bytes[1..])?));
        }
        Ok(StorageKey::Version(decode_u64(bytes)?))
    }
}

/// Decode a big-endian u64 value or key
pub fn decode_u64(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(arr))
}

fn fixed_hash(bytes: &[u8]) -> Result<NodeHash> {
    NodeHash::from_slice(bytes).map_err(|e| Error::InvalidKey(e.to_string()))
}
