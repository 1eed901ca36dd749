//! Merkle Patricia trie with forestry commitments
//!
//! This implements a content-addressed radix-16 trie where:
//! - Each node is stored under its commitment, which covers its children's commitments
//! - Unchanged subtrees share storage across versions
//! - The root hash matches what the on-chain forestry verifier computes for
//!   the same entries

mod node;
mod secure;
mod tree;

pub use node::TrieNode;
pub use secure::SecureTrie;
pub use tree::MerklePatriciaTrie;
