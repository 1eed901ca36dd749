//! Trie node types

use crate::model::merkle::{branch_commitment, branch_root, leaf_commitment, RADIX};
use crate::model::{Hasher, NibblePath, NodeHash};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A node in the Merkle Patricia trie
///
/// Nodes are stored under their forestry commitment, so a node's store key
/// is also the hash its parent folds into its own commitment. An extension
/// plus the branch below it commit exactly like a single prefixed branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrieNode {
    /// End of a key; `suffix` is the path left after the parent's slot
    Leaf { suffix: NibblePath, value: Vec<u8> },
    /// Shared nibbles in front of a branch
    Extension {
        path: NibblePath,
        /// Hash of the branch below
        child: NodeHash,
        /// Merkle root of that branch, kept so the commitment needs no extra read
        child_root: NodeHash,
    },
    /// Sixteen child slots plus the value of a key ending here
    Branch {
        children: [Option<NodeHash>; RADIX],
        value: Option<Vec<u8>>,
    },
}

impl TrieNode {
    pub fn leaf(suffix: NibblePath, value: Vec<u8>) -> Self {
        TrieNode::Leaf { suffix, value }
    }

    /// A branch with no children and no value
    pub fn empty_branch() -> Self {
        TrieNode::Branch {
            children: [None; RADIX],
            value: None,
        }
    }

    /// Merkle root over the children of a branch, value folded in
    pub fn merkle_root(&self, hasher: &dyn Hasher) -> Option<NodeHash> {
        match self {
            TrieNode::Branch { children, value } => {
                let hashes = child_hashes(children);
                let value_hash = value.as_ref().map(|v| hasher.digest(v));
                Some(branch_root(hasher, &hashes, value_hash.as_ref()))
            }
            TrieNode::Extension { child_root, .. } => Some(*child_root),
            TrieNode::Leaf { .. } => None,
        }
    }

    /// The hash this node is stored under
    pub fn commitment(&self, hasher: &dyn Hasher) -> NodeHash {
        match self {
            TrieNode::Leaf { suffix, value } => leaf_commitment(hasher, suffix, &hasher.digest(value)),
            TrieNode::Extension { path, child_root, .. } => branch_commitment(hasher, path, child_root),
            TrieNode::Branch { children, value } => {
                let hashes = child_hashes(children);
                let value_hash = value.as_ref().map(|v| hasher.digest(v));
                branch_commitment(
                    hasher,
                    &NibblePath::empty(),
                    &branch_root(hasher, &hashes, value_hash.as_ref()),
                )
            }
        }
    }

    /// Hashes of the nodes this one points at
    pub fn child_refs(&self) -> Vec<NodeHash> {
        match self {
            TrieNode::Leaf { .. } => Vec::new(),
            TrieNode::Extension { child, .. } => vec![*child],
            TrieNode::Branch { children, .. } => children.iter().flatten().copied().collect(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| Error::Corruption(format!("undecodable trie node: {}", e)))
    }
}

fn child_hashes(children: &[Option<NodeHash>; RADIX]) -> [NodeHash; RADIX] {
    let mut hashes = [NodeHash::ZERO; RADIX];
    for (slot, child) in hashes.iter_mut().zip(children.iter()) {
        if let Some(h) = child {
            *slot = *h;
        }
    }
    hashes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Blake2b256;

    #[test]
    fn test_commitment_deterministic() {
        let node = TrieNode::leaf(NibblePath::from_bytes(b"key"), b"value".to_vec());
        assert_eq!(node.commitment(&Blake2b256), node.commitment(&Blake2b256));
    }

    #[test]
    fn test_extension_commits_like_prefixed_branch() {
        let h = Blake2b256;
        let mut branch = TrieNode::empty_branch();
        if let TrieNode::Branch { children, .. } = &mut branch {
            children[1] = Some(h.digest(b"x"));
            children[9] = Some(h.digest(b"y"));
        }
        let root = branch.merkle_root(&h).unwrap();
        let prefix = NibblePath::from_hex("abc").unwrap();
        let ext = TrieNode::Extension {
            path: prefix.clone(),
            child: branch.commitment(&h),
            child_root: root,
        };
        assert_eq!(ext.commitment(&h), branch_commitment(&h, &prefix, &root));
        assert_eq!(branch.commitment(&h), h.digest(root.as_bytes()));
    }

    #[test]
    fn test_encode_decode() {
        let node = TrieNode::leaf(NibblePath::from_hex("abc").unwrap(), b"v".to_vec());
        let bytes = node.encode().unwrap();
        assert_eq!(TrieNode::decode(&bytes).unwrap(), node);
        assert!(matches!(TrieNode::decode(&[0xff; 3]), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_child_refs() {
        let leaf = TrieNode::leaf(NibblePath::empty(), b"v".to_vec());
        assert!(leaf.child_refs().is_empty());
        let mut branch = TrieNode::empty_branch();
        if let TrieNode::Branch { children, .. } = &mut branch {
            children[0] = Some(NodeHash::from_bytes([1; 32]));
            children[15] = Some(NodeHash::from_bytes([2; 32]));
        }
        assert_eq!(branch.child_refs().len(), 2);
    }
}
