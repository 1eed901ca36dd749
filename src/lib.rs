//! # forestry_db
//!
//! Content-addressed, versioned Merkle tries whose roots and proofs are
//! accepted by an on-chain Merkle Patricia Forestry verifier.
//!
//! forestry_db stores tree nodes under their commitments in a shared node
//! store, so every committed version shares unchanged subtrees with the
//! others, and a roots index maps monotonically increasing versions to roots.
//!
//! ## Core Concepts
//!
//! - **Tries**: radix-16 Merkle Patricia tries, optionally keyed by `H(key)`
//! - **Sparse Merkle trees**: binary depth-256 trees with compact proofs
//! - **Jellyfish trees**: version-addressed nodes with stale-node pruning
//! - **Proofs**: MPF steps in a CBOR wire format, renderable as JSON or Aiken
//! - **Garbage collection**: mark-sweep or reference counting under a retention policy
//!
//! ## Example
//!
//! ```ignore
//! use forestry_db::StateTrees;
//!
//! let trees = StateTrees::open_path("./state")?;
//! let (version, root) = trees.update(|trie| trie.put(b"apple", b"200"))?;
//! let proof = trees.secure_trie(root).get_proof_wire(b"apple")?;
//! ```

pub mod gc;
pub mod jmt;
pub mod model;
pub mod proof;
pub mod smt;
pub mod store;
pub mod trie;

mod database;
mod error;

pub use database::StateTrees;
pub use error::{Error, Result};
pub use gc::{GcManager, GcOptions, GcReport, GcStrategy, RetentionPolicy};
pub use jmt::{JellyfishMerkleTree, MemoryJmtStore, RocksJmtStore};
pub use model::{Blake2b256, Blake3, Hasher, NibblePath, NodeHash};
pub use proof::{to_aiken, to_json, MpfProof, ProofStep};
pub use smt::{SmtProof, SparseMerkleTree};
pub use store::{
    MemoryDb, MemoryNodeStore, MemoryRootsIndex, Namespace, NodeStore, RocksNodeStore, RocksRootsIndex, RootsIndex,
    StorageMode, StoreConfig,
};
pub use trie::{MerklePatriciaTrie, SecureTrie};
