//! Merkle Patricia Forestry proofs
//!
//! A proof is the list of steps from the root down to the position of a key.
//! Each step consumes `skip` shared nibbles plus one branching nibble and
//! carries just enough sibling data to rebuild that level's commitment:
//! - `Branch`: the four merkle neighbors of the slot taken
//! - `Fork`: the only other child, a branch given by its nibble, prefix and root
//! - `Leaf`: the only other child, a leaf given by its full key path and value hash
//!
//! Verification is a pure function of the proof, the root, the key path and
//! the value hash. It never touches a store and reports failure as `false`.

mod builder;
pub mod cbor;
mod render;
mod wire;

pub use builder::{build_proof, ProofSource, WalkNode};
pub use render::{to_aiken, to_json};

use crate::model::merkle::{branch_commitment, leaf_commitment, merkle16_from_neighbors, sparse_merkle16};
use crate::model::{Hasher, NibblePath, NodeHash};
use crate::Result;

/// Sibling subtree summarized by a `Fork` step
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Neighbor {
    /// Slot of the sibling in the branch
    pub nibble: u8,
    /// Nibbles the sibling branch skips below its slot
    pub prefix: NibblePath,
    /// Merkle root of the sibling branch's children
    pub root: NodeHash,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProofStep {
    Branch {
        skip: usize,
        neighbors: [NodeHash; 4],
        /// Value hash of a branch that also stores a value
        value: Option<NodeHash>,
    },
    Fork {
        skip: usize,
        neighbor: Neighbor,
    },
    Leaf {
        skip: usize,
        /// Full key path of the neighboring leaf, packed
        key: Vec<u8>,
        /// Value hash of the neighboring leaf
        value: NodeHash,
    },
}

impl ProofStep {
    pub fn skip(&self) -> usize {
        match self {
            ProofStep::Branch { skip, .. } | ProofStep::Fork { skip, .. } | ProofStep::Leaf { skip, .. } => {
                *skip
            }
        }
    }
}

/// An inclusion or exclusion proof in the MPF layout
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MpfProof {
    pub steps: Vec<ProofStep>,
}

impl MpfProof {
    pub fn new(steps: Vec<ProofStep>) -> Self {
        MpfProof { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Canonical CBOR encoding
    pub fn to_wire(&self) -> Vec<u8> {
        wire::encode(self)
    }

    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        wire::decode(bytes)
    }

    /// Check that `path` maps to a value hashing to `value_hash` under `root`
    pub fn verify_inclusion(&self, hasher: &dyn Hasher, root: &NodeHash, path: &NibblePath, value_hash: &NodeHash) -> bool {
        self.including_root(hasher, path, value_hash).as_ref() == Some(root)
    }

    /// Check that `path` is absent under `root`
    pub fn verify_exclusion(&self, hasher: &dyn Hasher, root: &NodeHash, path: &NibblePath) -> bool {
        self.excluding_root(hasher, path).as_ref() == Some(root)
    }

    /// Root of the tree these steps describe with `path` bound to `value_hash`
    ///
    /// `None` when the steps do not fit the path.
    pub fn including_root(&self, hasher: &dyn Hasher, path: &NibblePath, value_hash: &NodeHash) -> Option<NodeHash> {
        let cursors = self.cursors(path.len(), self.steps.len())?;
        let last = *cursors.last()?;
        let mut acc = leaf_commitment(hasher, &path.suffix(last), value_hash);
        for (step, cursor) in self.steps.iter().zip(cursors.iter()).rev() {
            acc = step_root(hasher, path, *cursor, step, acc)?;
        }
        Some(acc)
    }

    /// Root of the tree these steps describe with `path` left out
    pub fn excluding_root(&self, hasher: &dyn Hasher, path: &NibblePath) -> Option<NodeHash> {
        let (last_step, earlier) = match self.steps.split_last() {
            Some(split) => split,
            None => return Some(NodeHash::ZERO),
        };
        let cursors = self.cursors(path.len(), earlier.len())?;
        let cursor = *cursors.last()?;

        let mut acc = match last_step {
            ProofStep::Branch { .. } => step_root(hasher, path, cursor, last_step, NodeHash::ZERO)?,
            ProofStep::Fork { skip, neighbor } => {
                // without the key, the fork collapses into its sibling
                let end = cursor.checked_add(*skip).filter(|end| *end <= path.len())?;
                let prefix = path
                    .slice(cursor, end)
                    .push(neighbor.nibble)
                    .concat(&neighbor.prefix);
                branch_commitment(hasher, &prefix, &neighbor.root)
            }
            ProofStep::Leaf { key, value, .. } => {
                let key_path = NibblePath::from_bytes(key);
                if cursor > key_path.len() {
                    return None;
                }
                leaf_commitment(hasher, &key_path.suffix(cursor), value)
            }
        };
        for (step, cursor) in earlier.iter().zip(cursors.iter()).rev() {
            acc = step_root(hasher, path, *cursor, step, acc)?;
        }
        Some(acc)
    }

    /// Cursor before each of the first `count` steps, then the cursor after them
    fn cursors(&self, path_len: usize, count: usize) -> Option<Vec<usize>> {
        let mut out = Vec::with_capacity(count + 1);
        let mut cursor = 0usize;
        out.push(cursor);
        for step in &self.steps[..count] {
            cursor = cursor
                .checked_add(1)?
                .checked_add(step.skip())
                .filter(|next| *next <= path_len)?;
            out.push(cursor);
        }
        Some(out)
    }
}

/// Commitment of the branch a step describes, given the commitment `me` of the
/// child on the path
fn step_root(hasher: &dyn Hasher, path: &NibblePath, cursor: usize, step: &ProofStep, me: NodeHash) -> Option<NodeHash> {
    let next = cursor.checked_add(1)?.checked_add(step.skip())?;
    if next > path.len() {
        return None;
    }
    let nibble = path.get(next - 1);
    let prefix = path.slice(cursor, next - 1);

    let root = match step {
        ProofStep::Branch { neighbors, value, .. } => {
            let root = merkle16_from_neighbors(hasher, nibble, me, neighbors);
            match value {
                Some(vh) => hasher.combine(&root, &leaf_commitment(hasher, &NibblePath::empty(), vh)),
                None => root,
            }
        }
        ProofStep::Fork { neighbor, .. } => {
            if neighbor.nibble == nibble || neighbor.nibble > 0x0f {
                return None;
            }
            let other = branch_commitment(hasher, &neighbor.prefix, &neighbor.root);
            sparse_merkle16(hasher, nibble, me, neighbor.nibble, other)
        }
        ProofStep::Leaf { key, value, .. } => {
            let key_path = NibblePath::from_bytes(key);
            if key_path.len() < next {
                return None;
            }
            let other_nibble = key_path.get(next - 1);
            if other_nibble == nibble {
                return None;
            }
            let other = leaf_commitment(hasher, &key_path.suffix(next), value);
            sparse_merkle16(hasher, nibble, me, other_nibble, other)
        }
    };
    Some(branch_commitment(hasher, &prefix, &root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::merkle::{merkle_root16, neighbors, RADIX};
    use crate::model::Blake2b256;

    fn path(hex: &str) -> NibblePath {
        NibblePath::from_hex(hex).unwrap()
    }

    #[test]
    fn test_empty_proof() {
        let h = Blake2b256;
        let proof = MpfProof::default();
        let p = path("abcd");
        let vh = h.digest(b"v");
        assert!(proof.verify_exclusion(&h, &NodeHash::ZERO, &p));
        // a single leaf at the root commits to the whole path
        let root = leaf_commitment(&h, &p, &vh);
        assert!(proof.verify_inclusion(&h, &root, &p, &vh));
    }

    #[test]
    fn test_leaf_step_against_hand_built_root() {
        let h = Blake2b256;
        let a = path("12ab");
        let b = path("15cd");
        let (va, vb) = (h.digest(b"a"), h.digest(b"b"));

        // branch with prefix "1" and leaves at slots 2 and 5
        let mut children = [NodeHash::ZERO; RADIX];
        children[2] = leaf_commitment(&h, &path("ab"), &va);
        children[5] = leaf_commitment(&h, &path("cd"), &vb);
        let root = branch_commitment(&h, &path("1"), &merkle_root16(&h, &children));

        let proof = MpfProof::new(vec![ProofStep::Leaf {
            skip: 1,
            key: b.to_bytes(),
            value: vb,
        }]);
        assert!(proof.verify_inclusion(&h, &root, &a, &va));
        assert!(!proof.verify_inclusion(&h, &root, &a, &vb));

        // without "12ab" only the "15cd" leaf remains
        assert_eq!(proof.excluding_root(&h, &a), Some(leaf_commitment(&h, &b, &vb)));
    }

    #[test]
    fn test_branch_step_exclusion_uses_null_slot() {
        let h = Blake2b256;
        let mut children = [NodeHash::ZERO; RADIX];
        for i in [0usize, 4, 9] {
            children[i] = h.digest(&[i as u8]);
        }
        let root = branch_commitment(&h, &NibblePath::empty(), &merkle_root16(&h, &children));
        let proof = MpfProof::new(vec![ProofStep::Branch {
            skip: 0,
            neighbors: neighbors(&h, &children, 7),
            value: None,
        }]);
        assert!(proof.verify_exclusion(&h, &root, &path("7abc")));
        assert!(!proof.verify_exclusion(&h, &root, &path("4abc")));
    }

    #[test]
    fn test_out_of_range_skip_is_false_not_panic() {
        let h = Blake2b256;
        let proof = MpfProof::new(vec![ProofStep::Branch {
            skip: usize::MAX,
            neighbors: [NodeHash::ZERO; 4],
            value: None,
        }]);
        assert!(!proof.verify_inclusion(&h, &NodeHash::ZERO, &path("ab"), &NodeHash::ZERO));
        assert!(!proof.verify_exclusion(&h, &NodeHash::ZERO, &path("ab")));

        let leaf = MpfProof::new(vec![ProofStep::Leaf {
            skip: 0,
            key: vec![],
            value: NodeHash::ZERO,
        }]);
        assert!(!leaf.verify_inclusion(&h, &NodeHash::ZERO, &path("ab"), &NodeHash::ZERO));
    }
}
