//! Versioned node types and their storage keys

use crate::model::merkle::{branch_commitment, leaf_commitment, merkle_root16, RADIX};
use crate::model::{Hasher, NibblePath, NodeHash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Where a node lives: the version that wrote it and its position
///
/// `path` holds the nibbles consumed above the node, including the parent's
/// branching nibble. A node keeps its key for as long as it stays unchanged at
/// that position, which is what lets later versions share it.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub version: u64,
    pub path: NibblePath,
}

impl NodeKey {
    pub fn new(version: u64, path: NibblePath) -> Self {
        NodeKey { version, path }
    }

    /// `version (u64 BE) ‖ nibble count ‖ one nibble per byte`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9 + self.path.len());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.path.len() as u8);
        out.extend_from_slice(&self.path.to_nibble_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 9 || bytes.len() != 9 + bytes[8] as usize {
            return Err(Error::InvalidKey(format!("{}-byte node key", bytes.len())));
        }
        let mut version = [0u8; 8];
        version.copy_from_slice(&bytes[..8]);
        Ok(NodeKey {
            version: u64::from_be_bytes(version),
            path: NibblePath::from_nibbles(&bytes[9..])?,
        })
    }
}

/// A parent's view of one child
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    /// Version that wrote the child
    pub version: u64,
    /// Forestry commitment of the child
    pub hash: NodeHash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JmtNode {
    /// Branches after skipping `prefix`
    Internal {
        prefix: NibblePath,
        children: [Option<ChildRef>; RADIX],
    },
    Leaf { key_hash: NodeHash, value: Vec<u8> },
}

impl JmtNode {
    /// Commitment of the node when it sits at `position`
    pub fn commitment(&self, hasher: &dyn Hasher, position: &NibblePath) -> NodeHash {
        match self {
            JmtNode::Internal { prefix, children } => {
                branch_commitment(hasher, prefix, &children_root(hasher, children))
            }
            JmtNode::Leaf { key_hash, value } => {
                let suffix = NibblePath::from_bytes(key_hash.as_bytes()).suffix(position.len());
                leaf_commitment(hasher, &suffix, &hasher.digest(value))
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Corruption(format!("undecodable jmt node: {}", e)))
    }
}

/// Merkle root over the commitments of an internal node's children
pub fn children_root(hasher: &dyn Hasher, children: &[Option<ChildRef>; RADIX]) -> NodeHash {
    let mut hashes = [NodeHash::ZERO; RADIX];
    for (slot, child) in hashes.iter_mut().zip(children.iter()) {
        if let Some(c) = child {
            *slot = c.hash;
        }
    }
    merkle_root16(hasher, &hashes)
}

/// Root of one committed version; `node` is `None` for the empty tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEntry {
    pub node: Option<NodeKey>,
    pub hash: NodeHash,
}

impl RootEntry {
    pub fn empty() -> Self {
        RootEntry {
            node: None,
            hash: NodeHash::ZERO,
        }
    }
}

/// A node that stopped being reachable at `stale_since`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaleEntry {
    pub stale_since: u64,
    pub node: NodeKey,
}

impl StaleEntry {
    /// `stale_since (u64 BE) ‖ node key`, so entries sort by version
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.stale_since.to_be_bytes().to_vec();
        out.extend_from_slice(&self.node.encode());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::InvalidKey(format!("{}-byte stale entry", bytes.len())));
        }
        let mut since = [0u8; 8];
        since.copy_from_slice(&bytes[..8]);
        Ok(StaleEntry {
            stale_since: u64::from_be_bytes(since),
            node: NodeKey::decode(&bytes[8..])?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Blake2b256;

    #[test]
    fn test_node_key_layout() {
        let key = NodeKey::new(258, NibblePath::from_hex("a1f").unwrap());
        let bytes = key.encode();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 1, 2, 3, 0x0a, 0x01, 0x0f]);
        assert_eq!(NodeKey::decode(&bytes).unwrap(), key);
        assert!(NodeKey::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn test_stale_entries_sort_by_version() {
        let a = StaleEntry {
            stale_since: 2,
            node: NodeKey::new(9, NibblePath::empty()),
        };
        let b = StaleEntry {
            stale_since: 3,
            node: NodeKey::new(1, NibblePath::empty()),
        };
        assert!(a.encode() < b.encode());
        assert_eq!(StaleEntry::decode(&b.encode()).unwrap(), b);
    }

    #[test]
    fn test_leaf_commitment_depends_on_position() {
        let h = Blake2b256;
        let leaf = JmtNode::Leaf {
            key_hash: h.digest(b"key"),
            value: b"v".to_vec(),
        };
        let top = leaf.commitment(&h, &NibblePath::empty());
        let deeper = leaf.commitment(&h, &NibblePath::from_hex("a").unwrap());
        assert_ne!(top, deeper);
        assert!(matches!(JmtNode::decode(&[0xff; 4]), Err(Error::Corruption(_))));
    }
}
