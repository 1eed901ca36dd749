//! Sparse Merkle tree
//!
//! A binary tree of fixed depth 256 over `H(key)`: bit `d` of the hashed key
//! (most significant first) picks the child at depth `d`. Every empty subtree
//! has a known digest, so absent keys are proven by an empty leaf slot and
//! empty subtrees are never stored.

mod node;
mod proof;
mod tree;

pub use node::SmtNode;
pub use proof::{SmtProof, SmtProofKind};
pub use tree::SparseMerkleTree;

use crate::model::{Hasher, NodeHash};

/// Number of levels below the root; one per bit of the key hash
pub const SMT_DEPTH: usize = 256;

/// Digest of an empty subtree at every depth
///
/// `at(256)` is the null hash; `at(d) = H(at(d + 1) ++ at(d + 1))`.
#[derive(Clone, Debug)]
pub struct EmptyHashes {
    hashes: Vec<NodeHash>,
}

impl EmptyHashes {
    pub fn new(hasher: &dyn Hasher) -> Self {
        let mut hashes = vec![NodeHash::ZERO; SMT_DEPTH + 1];
        for d in (0..SMT_DEPTH).rev() {
            hashes[d] = hasher.combine(&hashes[d + 1], &hashes[d + 1]);
        }
        EmptyHashes { hashes }
    }

    /// Empty digest at `depth` (0 is the root, 256 a leaf slot)
    pub fn at(&self, depth: usize) -> NodeHash {
        self.hashes[depth.min(SMT_DEPTH)]
    }

    /// Root of the empty tree
    pub fn root(&self) -> NodeHash {
        self.hashes[0]
    }

    pub fn contains(&self, hash: &NodeHash) -> bool {
        self.hashes.contains(hash)
    }
}

/// Bit `depth` of a key hash, most significant bit first
pub(crate) fn bit(key_hash: &NodeHash, depth: usize) -> bool {
    let byte = key_hash.as_bytes()[depth / 8];
    (byte >> (7 - depth % 8)) & 1 == 1
}
