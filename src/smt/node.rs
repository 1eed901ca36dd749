//! Sparse tree node types

use crate::model::{Hasher, NodeHash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A stored node of the sparse tree; empty subtrees are implicit
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SmtNode {
    Internal { left: NodeHash, right: NodeHash },
    Leaf { key_hash: NodeHash, value: Vec<u8> },
}

impl SmtNode {
    /// Digest of a leaf: `H(key_hash ++ H(value))`
    pub fn leaf_digest(hasher: &dyn Hasher, key_hash: &NodeHash, value: &[u8]) -> NodeHash {
        hasher.digest_many(&[key_hash.as_bytes(), hasher.digest(value).as_bytes()])
    }

    pub fn digest(&self, hasher: &dyn Hasher) -> NodeHash {
        match self {
            SmtNode::Internal { left, right } => hasher.combine(left, right),
            SmtNode::Leaf { key_hash, value } => Self::leaf_digest(hasher, key_hash, value),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Corruption(format!("undecodable sparse tree node: {}", e)))
    }
}
