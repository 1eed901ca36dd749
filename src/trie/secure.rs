//! Trie keyed by the hash of each key

use super::MerklePatriciaTrie;
use crate::model::{Hasher, NibblePath, NodeHash};
use crate::proof::MpfProof;
use crate::store::NodeStore;
use crate::Result;
use std::sync::Arc;

/// A [`MerklePatriciaTrie`] whose paths are `H(key)`
///
/// Hashing fixes every path at 64 nibbles and spreads keys evenly, which
/// is the layout the on-chain verifier expects. Only hashed keys are stored;
/// callers that need the original keys keep them elsewhere.
pub struct SecureTrie<'a> {
    trie: MerklePatriciaTrie<'a>,
}

impl<'a> SecureTrie<'a> {
    pub fn new(store: &'a dyn NodeStore) -> Self {
        SecureTrie {
            trie: MerklePatriciaTrie::new(store),
        }
    }

    pub fn with_root(store: &'a dyn NodeStore, root: NodeHash) -> Self {
        SecureTrie {
            trie: MerklePatriciaTrie::with_root(store, root),
        }
    }

    pub fn with_hasher(self, hasher: Arc<dyn Hasher>) -> Self {
        SecureTrie {
            trie: self.trie.with_hasher(hasher),
        }
    }

    /// Path a key is stored under
    pub fn key_path(hasher: &dyn Hasher, key: &[u8]) -> NibblePath {
        NibblePath::from_bytes(hasher.digest(key).as_bytes())
    }

    fn path(&self, key: &[u8]) -> NibblePath {
        Self::key_path(self.trie.hasher(), key)
    }

    pub fn root_hash(&self) -> NodeHash {
        self.trie.root_hash()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.trie.put_path(&path, value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.trie.get_path(&self.path(key))
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        self.trie.delete_path(&path)
    }

    pub fn get_proof(&self, key: &[u8]) -> Result<MpfProof> {
        self.trie.proof_for_path(&self.path(key))
    }

    pub fn get_proof_wire(&self, key: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get_proof(key)?.to_wire())
    }

    /// All entries as `(H(key), value)`, ordered by hashed key
    pub fn entries(&self) -> Result<Vec<(NodeHash, Vec<u8>)>> {
        self.trie
            .entries()?
            .into_iter()
            .map(|(k, v)| Ok((NodeHash::from_slice(&k)?, v)))
            .collect()
    }

    /// The underlying trie over hashed paths
    pub fn inner(&self) -> &MerklePatriciaTrie<'a> {
        &self.trie
    }

    pub fn verify_inclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], value: &[u8], proof: &MpfProof) -> bool {
        proof.verify_inclusion(hasher, root, &Self::key_path(hasher, key), &hasher.digest(value))
    }

    pub fn verify_exclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], proof: &MpfProof) -> bool {
        proof.verify_exclusion(hasher, root, &Self::key_path(hasher, key))
    }
}
