//! Merkle Patricia trie over a node store

use super::TrieNode;
use crate::model::merkle::RADIX;
use crate::model::{Blake2b256, Hasher, NibblePath, NodeHash};
use crate::proof::{build_proof, MpfProof, ProofSource, WalkNode};
use crate::store::NodeStore;
use crate::{Error, Result};
use std::sync::Arc;

/// A node together with the hash it was stored under
type Stored = (NodeHash, TrieNode);

/// A radix-16 Merkle Patricia trie with forestry commitments
///
/// Every update writes the new nodes on the changed path and leaves the rest
/// of the tree untouched, so older roots stay readable until garbage
/// collected. The empty trie has the null root.
pub struct MerklePatriciaTrie<'a> {
    store: &'a dyn NodeStore,
    hasher: Arc<dyn Hasher>,
    root: NodeHash,
}

impl<'a> MerklePatriciaTrie<'a> {
    /// Create a new empty trie
    pub fn new(store: &'a dyn NodeStore) -> Self {
        Self::with_root(store, NodeHash::ZERO)
    }

    /// Open the trie rooted at `root`; the null hash is the empty trie
    pub fn with_root(store: &'a dyn NodeStore, root: NodeHash) -> Self {
        MerklePatriciaTrie {
            store,
            hasher: Arc::new(Blake2b256),
            root,
        }
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn Hasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn hasher(&self) -> &dyn Hasher {
        self.hasher.as_ref()
    }

    pub fn root_hash(&self) -> NodeHash {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_zero()
    }

    /// Insert or overwrite a key; empty values are rejected
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_path(&NibblePath::from_bytes(key), value)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_path(&NibblePath::from_bytes(key))
    }

    /// Remove a key, returning its old value
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.delete_path(&NibblePath::from_bytes(key))
    }

    /// Inclusion proof for a present key, exclusion proof otherwise
    pub fn get_proof(&self, key: &[u8]) -> Result<MpfProof> {
        self.proof_for_path(&NibblePath::from_bytes(key))
    }

    /// [`get_proof`](Self::get_proof) in the MPF wire format
    pub fn get_proof_wire(&self, key: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get_proof(key)?.to_wire())
    }

    /// All entries in key order
    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.scan_prefix(&[])
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        if self.is_empty() {
            return Ok(out);
        }
        let prefix = NibblePath::from_bytes(prefix);
        self.collect(self.root, NibblePath::empty(), &prefix, &mut out)?;
        Ok(out)
    }

    /// Verify that `key` maps to `value` under `root`
    pub fn verify_inclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], value: &[u8], proof: &MpfProof) -> bool {
        proof.verify_inclusion(hasher, root, &NibblePath::from_bytes(key), &hasher.digest(value))
    }

    /// Verify that `key` is absent under `root`
    pub fn verify_exclusion(hasher: &dyn Hasher, root: &NodeHash, key: &[u8], proof: &MpfProof) -> bool {
        proof.verify_exclusion(hasher, root, &NibblePath::from_bytes(key))
    }

    // === Path-level operations, shared with SecureTrie ===

    pub(crate) fn put_path(&mut self, path: &NibblePath, value: &[u8]) -> Result<()> {
        if value.is_empty() {
            return Err(Error::InvalidValue(
                "empty values are not stored; delete the key instead".into(),
            ));
        }
        let root = if self.is_empty() { None } else { Some(self.root) };
        let (hash, _) = self.insert(root, path, value)?;
        self.root = hash;
        Ok(())
    }

    pub(crate) fn get_path(&self, path: &NibblePath) -> Result<Option<Vec<u8>>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut hash = self.root;
        let mut cursor = 0usize;
        loop {
            let rest = path.suffix(cursor);
            match self.load_node(&hash)? {
                TrieNode::Leaf { suffix, value } => {
                    return Ok(if suffix == rest { Some(value) } else { None });
                }
                TrieNode::Extension { path: ext, child, .. } => {
                    if !rest.starts_with(&ext) {
                        return Ok(None);
                    }
                    cursor += ext.len();
                    hash = child;
                }
                TrieNode::Branch { children, value } => {
                    if rest.is_empty() {
                        return Ok(value);
                    }
                    match children[rest.get(0) as usize] {
                        Some(child) => {
                            cursor += 1;
                            hash = child;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    pub(crate) fn delete_path(&mut self, path: &NibblePath) -> Result<Option<Vec<u8>>> {
        if self.is_empty() {
            return Ok(None);
        }
        match self.remove(self.root, path)? {
            Some((subtree, removed)) => {
                self.root = subtree.map_or(NodeHash::ZERO, |(hash, _)| hash);
                Ok(Some(removed))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn proof_for_path(&self, path: &NibblePath) -> Result<MpfProof> {
        let root = if self.is_empty() { None } else { Some(self.root) };
        build_proof(self, self.hasher(), root, path)
    }

    // === Internal helpers ===

    fn load_node(&self, hash: &NodeHash) -> Result<TrieNode> {
        let bytes = self.store.get(hash)?.ok_or(Error::MissingNode(*hash))?;
        TrieNode::decode(&bytes)
    }

    fn persist_node(&self, node: TrieNode) -> Result<Stored> {
        let hash = node.commitment(self.hasher());
        self.store.put(&hash, &node.encode()?)?;
        Ok((hash, node))
    }

    /// Put an extension in front of `branch` unless `prefix` is empty
    fn wrap(&self, prefix: NibblePath, branch: Stored) -> Result<Stored> {
        if prefix.is_empty() {
            return Ok(branch);
        }
        let (child, node) = branch;
        let child_root = node
            .merkle_root(self.hasher())
            .ok_or_else(|| Error::Corruption(format!("extension target {} is a leaf", child)))?;
        self.persist_node(TrieNode::Extension {
            path: prefix,
            child,
            child_root,
        })
    }

    /// Hang `value` at `rest` (relative to the branch) inside a branch being built
    fn place(&self, children: &mut [Option<NodeHash>; RADIX], branch_value: &mut Option<Vec<u8>>, rest: &NibblePath, value: Vec<u8>) -> Result<()> {
        if rest.is_empty() {
            *branch_value = Some(value);
        } else {
            let (leaf, _) = self.persist_node(TrieNode::leaf(rest.suffix(1), value))?;
            children[rest.get(0) as usize] = Some(leaf);
        }
        Ok(())
    }

    fn insert(&self, node: Option<NodeHash>, path: &NibblePath, value: &[u8]) -> Result<Stored> {
        let hash = match node {
            Some(hash) => hash,
            None => return self.persist_node(TrieNode::leaf(path.clone(), value.to_vec())),
        };

        match self.load_node(&hash)? {
            TrieNode::Leaf { suffix, value: old } => {
                if suffix == *path {
                    return self.persist_node(TrieNode::leaf(suffix, value.to_vec()));
                }
                // split into a branch at the first differing nibble
                let common = path.common_prefix_len(&suffix);
                let mut children = [None; RADIX];
                let mut branch_value = None;
                self.place(&mut children, &mut branch_value, &suffix.suffix(common), old)?;
                self.place(&mut children, &mut branch_value, &path.suffix(common), value.to_vec())?;
                let branch = self.persist_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                })?;
                self.wrap(path.prefix(common), branch)
            }
            TrieNode::Extension {
                path: ext,
                child,
                child_root,
            } => {
                let common = path.common_prefix_len(&ext);
                if common == ext.len() {
                    let branch = self.insert(Some(child), &path.suffix(common), value)?;
                    return self.wrap(ext, branch);
                }

                // split the extension; the old branch keeps what is left of the prefix
                let mut children = [None; RADIX];
                let rest = ext.suffix(common + 1);
                children[ext.get(common) as usize] = Some(if rest.is_empty() {
                    child
                } else {
                    self.persist_node(TrieNode::Extension {
                        path: rest,
                        child,
                        child_root,
                    })?
                    .0
                });
                let mut branch_value = None;
                self.place(&mut children, &mut branch_value, &path.suffix(common), value.to_vec())?;
                let branch = self.persist_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                })?;
                self.wrap(path.prefix(common), branch)
            }
            TrieNode::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return self.persist_node(TrieNode::Branch {
                        children,
                        value: Some(value.to_vec()),
                    });
                }
                let slot = path.get(0) as usize;
                let (child, _) = self.insert(children[slot], &path.suffix(1), value)?;
                children[slot] = Some(child);
                self.persist_node(TrieNode::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    /// Remove `path` below `hash`; `None` when the key is absent, otherwise the
    /// replacement subtree (if any) and the removed value
    fn remove(&self, hash: NodeHash, path: &NibblePath) -> Result<Option<(Option<Stored>, Vec<u8>)>> {
        match self.load_node(&hash)? {
            TrieNode::Leaf { suffix, value } => Ok(if suffix == *path {
                Some((None, value))
            } else {
                None
            }),
            TrieNode::Extension { path: ext, child, .. } => {
                if !path.starts_with(&ext) {
                    return Ok(None);
                }
                match self.remove(child, &path.suffix(ext.len()))? {
                    Some((subtree, removed)) => Ok(Some((self.prepend(&ext, subtree)?, removed))),
                    None => Ok(None),
                }
            }
            TrieNode::Branch { mut children, value } => {
                if path.is_empty() {
                    return match value {
                        Some(removed) => Ok(Some((self.normalize(children, None)?, removed))),
                        None => Ok(None),
                    };
                }
                let slot = path.get(0) as usize;
                let child = match children[slot] {
                    Some(child) => child,
                    None => return Ok(None),
                };
                match self.remove(child, &path.suffix(1))? {
                    Some((subtree, removed)) => {
                        children[slot] = subtree.map(|(h, _)| h);
                        Ok(Some((self.normalize(children, value)?, removed)))
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Rebuild a branch after a removal, collapsing it when it no longer branches
    fn normalize(&self, children: [Option<NodeHash>; RADIX], value: Option<Vec<u8>>) -> Result<Option<Stored>> {
        let occupied: Vec<usize> = (0..RADIX).filter(|i| children[*i].is_some()).collect();
        match (occupied.as_slice(), value) {
            ([], None) => Ok(None),
            ([], Some(value)) => Ok(Some(self.persist_node(TrieNode::leaf(NibblePath::empty(), value))?)),
            ([only], None) => {
                let hash = children[*only].ok_or_else(|| Error::Corruption("vanished child".into()))?;
                let node = self.load_node(&hash)?;
                let prefix = NibblePath::empty().push(*only as u8);
                self.prepend(&prefix, Some((hash, node)))
            }
            (_, value) => Ok(Some(self.persist_node(TrieNode::Branch { children, value })?)),
        }
    }

    /// Extend the path of a subtree by `prefix` nibbles in front
    fn prepend(&self, prefix: &NibblePath, subtree: Option<Stored>) -> Result<Option<Stored>> {
        let (hash, node) = match subtree {
            Some(stored) => stored,
            None => return Ok(None),
        };
        if prefix.is_empty() {
            return Ok(Some((hash, node)));
        }
        let merged = match node {
            TrieNode::Leaf { suffix, value } => TrieNode::leaf(prefix.concat(&suffix), value),
            TrieNode::Extension {
                path,
                child,
                child_root,
            } => TrieNode::Extension {
                path: prefix.concat(&path),
                child,
                child_root,
            },
            branch @ TrieNode::Branch { .. } => {
                let child_root = branch
                    .merkle_root(self.hasher())
                    .ok_or_else(|| Error::Corruption("branch without root".into()))?;
                TrieNode::Extension {
                    path: prefix.clone(),
                    child: hash,
                    child_root,
                }
            }
        };
        Ok(Some(self.persist_node(merged)?))
    }

    fn collect(&self, hash: NodeHash, at: NibblePath, prefix: &NibblePath, out: &mut Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        // prune subtrees that can no longer match
        let overlap = at.len().min(prefix.len());
        if at.prefix(overlap) != prefix.prefix(overlap) {
            return Ok(());
        }
        match self.load_node(&hash)? {
            TrieNode::Leaf { suffix, value } => {
                let full = at.concat(&suffix);
                if full.starts_with(prefix) {
                    out.push((full.to_bytes(), value));
                }
            }
            TrieNode::Extension { path, child, .. } => {
                self.collect(child, at.concat(&path), prefix, out)?;
            }
            TrieNode::Branch { children, value } => {
                if let Some(v) = value {
                    if at.starts_with(prefix) {
                        out.push((at.to_bytes(), v));
                    }
                }
                for (nibble, child) in children.iter().enumerate() {
                    if let Some(child) = child {
                        self.collect(*child, at.push(nibble as u8), prefix, out)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl<'a> ProofSource for MerklePatriciaTrie<'a> {
    type Id = NodeHash;

    fn load(&self, id: &NodeHash) -> Result<WalkNode<NodeHash>> {
        let hasher = self.hasher();
        let (prefix, branch) = match self.load_node(id)? {
            TrieNode::Leaf { suffix, value } => {
                return Ok(WalkNode::Leaf {
                    suffix,
                    value_hash: hasher.digest(&value),
                })
            }
            TrieNode::Extension { path, child, .. } => (path, self.load_node(&child)?),
            branch @ TrieNode::Branch { .. } => (NibblePath::empty(), branch),
        };
        let root = branch
            .merkle_root(hasher)
            .ok_or_else(|| Error::Corruption(format!("extension {} does not lead to a branch", id)))?;
        match branch {
            TrieNode::Branch { children, value } => {
                let mut walk_children: [Option<(NodeHash, NodeHash)>; RADIX] = [None; RADIX];
                for (slot, child) in walk_children.iter_mut().zip(children.iter()) {
                    *slot = child.map(|h| (h, h));
                }
                Ok(WalkNode::Branch {
                    prefix,
                    children: walk_children,
                    value_hash: value.map(|v| hasher.digest(&v)),
                    root,
                })
            }
            _ => Err(Error::Corruption(format!(
                "extension {} does not lead to a branch",
                id
            ))),
        }
    }
}
