//! Sparse Merkle tree over a node store

use super::{bit, EmptyHashes, SmtNode, SmtProof, SmtProofKind, SMT_DEPTH};
use crate::model::{Blake2b256, Hasher, NodeHash};
use crate::store::NodeStore;
use crate::{Error, Result};
use std::sync::Arc;

/// A depth-256 sparse Merkle tree
///
/// Updates rebuild the 256 nodes on the key's path bottom-up and leave every
/// other node in place. Subtrees that become empty collapse to the known
/// empty digest and are not stored.
pub struct SparseMerkleTree<'a> {
    store: &'a dyn NodeStore,
    hasher: Arc<dyn Hasher>,
    empty: EmptyHashes,
    root: NodeHash,
}

impl<'a> SparseMerkleTree<'a> {
    pub fn new(store: &'a dyn NodeStore) -> Self {
        let hasher: Arc<dyn Hasher> = Arc::new(Blake2b256);
        let empty = EmptyHashes::new(hasher.as_ref());
        let root = empty.root();
        SparseMerkleTree {
            store,
            hasher,
            empty,
            root,
        }
    }

    /// Open the tree rooted at `root`
    pub fn with_root(store: &'a dyn NodeStore, root: NodeHash) -> Self {
        let mut tree = Self::new(store);
        tree.root = root;
        tree
    }

    /// Switch hash functions; only meaningful on an empty tree
    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        let was_empty = self.is_empty();
        self.empty = EmptyHashes::new(hasher.as_ref());
        self.hasher = hasher;
        if was_empty {
            self.root = self.empty.root();
        }
        self
    }

    pub fn hasher(&self) -> &dyn Hasher {
        self.hasher.as_ref()
    }

    pub fn empty_hashes(&self) -> &EmptyHashes {
        &self.empty
    }

    pub fn root_hash(&self) -> NodeHash {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root == self.empty.root()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidValue(
                "empty values are not stored; delete the key instead".into(),
            ));
        }
        let key_hash = self.hasher.digest(key);
        let (siblings, _) = self.walk(&key_hash)?;
        let leaf = SmtNode::Leaf {
            key_hash,
            value: value.to_vec(),
        };
        let leaf_hash = self.persist_node(&leaf)?;
        self.root = self.rebuild(&key_hash, &siblings, leaf_hash)?;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_hash = self.hasher.digest(key);
        let mut hash = self.root;
        for depth in 0..SMT_DEPTH {
            if hash == self.empty.at(depth) {
                return Ok(None);
            }
            let (left, right) = self.load_internal(&hash)?;
            hash = if bit(&key_hash, depth) { right } else { left };
        }
        if hash == NodeHash::ZERO {
            return Ok(None);
        }
        match self.load_node(&hash)? {
            SmtNode::Leaf { key_hash: stored, value } if stored == key_hash => Ok(Some(value)),
            _ => Err(Error::Corruption(format!(
                "leaf slot of {} holds a foreign node {}",
                key_hash, hash
            ))),
        }
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let key_hash = self.hasher.digest(key);
        let (siblings, slot) = self.walk(&key_hash)?;
        if slot == NodeHash::ZERO {
            return Ok(false);
        }
        self.root = self.rebuild(&key_hash, &siblings, NodeHash::ZERO)?;
        Ok(true)
    }

    pub fn get_proof(&self, key: &[u8]) -> Result<SmtProof> {
        let key_hash = self.hasher.digest(key);
        let (mut siblings, slot) = self.walk(&key_hash)?;
        siblings.reverse();
        let kind = if slot == NodeHash::ZERO {
            SmtProofKind::NonInclusion
        } else {
            SmtProofKind::Inclusion
        };
        Ok(SmtProof { kind, siblings })
    }

    pub fn get_proof_wire(&self, key: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get_proof(key)?.to_wire(&self.empty))
    }

    pub fn verify_inclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], value: &[u8], proof: &SmtProof) -> bool {
        proof.verify_inclusion(hasher, root, key, value)
    }

    pub fn verify_non_inclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], proof: &SmtProof) -> bool {
        proof.verify_non_inclusion(hasher, root, key)
    }

    // === Internal helpers ===

    /// Siblings top-down (index `d` is the sibling at depth `d + 1`) and the
    /// digest currently in the key's leaf slot
    fn walk(&self, key_hash: &NodeHash) -> Result<(Vec<NodeHash>, NodeHash)> {
        let mut siblings = Vec::with_capacity(SMT_DEPTH);
        let mut hash = self.root;
        for depth in 0..SMT_DEPTH {
            if hash == self.empty.at(depth) {
                siblings.push(self.empty.at(depth + 1));
                hash = self.empty.at(depth + 1);
                continue;
            }
            let (left, right) = self.load_internal(&hash)?;
            if bit(key_hash, depth) {
                siblings.push(left);
                hash = right;
            } else {
                siblings.push(right);
                hash = left;
            }
        }
        Ok((siblings, hash))
    }

    /// Recompute the path from the leaf slot up, storing every non-empty node
    fn rebuild(&self, key_hash: &NodeHash, siblings: &[NodeHash], leaf: NodeHash) -> Result<NodeHash> {
        let mut acc = leaf;
        for depth in (0..SMT_DEPTH).rev() {
            let sibling = siblings[depth];
            let (left, right) = if bit(key_hash, depth) {
                (sibling, acc)
            } else {
                (acc, sibling)
            };
            let empty_child = self.empty.at(depth + 1);
            acc = if left == empty_child && right == empty_child {
                self.empty.at(depth)
            } else {
                self.persist_node(&SmtNode::Internal { left, right })?
            };
        }
        Ok(acc)
    }

    fn load_node(&self, hash: &NodeHash) -> Result<SmtNode> {
        let bytes = self.store.get(hash)?.ok_or(Error::MissingNode(*hash))?;
        SmtNode::decode(&bytes)
    }

    fn load_internal(&self, hash: &NodeHash) -> Result<(NodeHash, NodeHash)> {
        match self.load_node(hash)? {
            SmtNode::Internal { left, right } => Ok((left, right)),
            SmtNode::Leaf { .. } => Err(Error::Corruption(format!(
                "leaf {} found above the leaf level",
                hash
            ))),
        }
    }

    fn persist_node(&self, node: &SmtNode) -> Result<NodeHash> {
        let hash = node.digest(self.hasher());
        self.store.put(&hash, &node.encode()?)?;
        Ok(hash)
    }
}
