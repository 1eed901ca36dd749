//! Jellyfish Merkle tree
//!
//! A versioned variant of the radix trie. Each commit writes only the nodes
//! it changes and records the nodes it made unreachable in a stale index
//! keyed by version, so pruning old versions needs no reachability scan.

mod cache;
mod node;
mod store;
mod tree;

pub use cache::{CacheStats, TreeCache};
pub use node::{ChildRef, JmtNode, NodeKey, RootEntry, StaleEntry};
pub use store::{
    JmtBatch, JmtStore, KvJmtStore, MemoryJmtStore, RocksJmtStore, JMT_COLUMN_FAMILIES, JMT_NODES_CF,
    JMT_ROOTS_CF, JMT_STALE_CF,
};
pub use tree::{JellyfishMerkleTree, PruneReport};
