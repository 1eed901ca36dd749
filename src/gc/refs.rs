//! Child extraction from stored node bytes, per tree layout

use crate::model::{Blake2b256, Hasher, NodeHash};
use crate::smt::{EmptyHashes, SmtNode, SMT_DEPTH};
use crate::trie::TrieNode;
use crate::Result;
use std::collections::HashSet;

/// How the collector finds the children of a stored node
pub trait NodeRefs: Send + Sync {
    /// Hashes referenced by a node, in slot order; duplicates are kept
    fn child_refs(&self, bytes: &[u8]) -> Result<Vec<NodeHash>>;

    /// Whether `hash` names a stored node rather than an empty placeholder
    fn is_stored(&self, hash: &NodeHash) -> bool {
        !hash.is_zero()
    }
}

/// Patricia trie and secure trie nodes
#[derive(Clone, Copy, Debug, Default)]
pub struct TrieNodeRefs;

impl NodeRefs for TrieNodeRefs {
    fn child_refs(&self, bytes: &[u8]) -> Result<Vec<NodeHash>> {
        Ok(TrieNode::decode(bytes)?.child_refs())
    }
}

/// Sparse Merkle tree nodes; default subtrees are never stored
pub struct SmtNodeRefs {
    placeholders: HashSet<NodeHash>,
}

impl SmtNodeRefs {
    pub fn new(hasher: &dyn Hasher) -> Self {
        let empty = EmptyHashes::new(hasher);
        SmtNodeRefs {
            placeholders: (0..=SMT_DEPTH).map(|d| empty.at(d)).collect(),
        }
    }
}

impl Default for SmtNodeRefs {
    fn default() -> Self {
        Self::new(&Blake2b256)
    }
}

impl NodeRefs for SmtNodeRefs {
    fn child_refs(&self, bytes: &[u8]) -> Result<Vec<NodeHash>> {
        Ok(match SmtNode::decode(bytes)? {
            SmtNode::Internal { left, right } => vec![left, right],
            SmtNode::Leaf { .. } => Vec::new(),
        })
    }

    fn is_stored(&self, hash: &NodeHash) -> bool {
        !self.placeholders.contains(hash)
    }
}
