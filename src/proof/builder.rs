//! Walks a radix-16 tree and emits MPF proof steps
//!
//! Any tree whose commitments follow the forestry scheme can produce proofs by
//! presenting its nodes as [`WalkNode`]s: compressed leaves and branches with
//! an optional skipped prefix.

use super::{MpfProof, Neighbor, ProofStep};
use crate::model::merkle::{neighbors, RADIX};
use crate::model::{Hasher, NibblePath, NodeHash};
use crate::{Error, Result};

/// A node as seen by the proof walk
pub enum WalkNode<Id> {
    Leaf {
        /// Remaining path below the parent slot
        suffix: NibblePath,
        value_hash: NodeHash,
    },
    Branch {
        /// Nibbles skipped before branching
        prefix: NibblePath,
        /// Child locators paired with their commitments
        children: [Option<(Id, NodeHash)>; RADIX],
        value_hash: Option<NodeHash>,
        /// Merkle root over the children, value folded in
        root: NodeHash,
    },
}

/// Random access to the nodes of one tree version
pub trait ProofSource {
    type Id: Clone;

    fn load(&self, id: &Self::Id) -> Result<WalkNode<Self::Id>>;
}

/// Proof for `path` starting at `root`: inclusion when the path is present,
/// exclusion otherwise
///
/// Paths that end on a branch or inside a prefix cannot be expressed and fail
/// with `InvalidKey`; fixed-length paths never hit this.
pub fn build_proof<S: ProofSource>(
    source: &S,
    hasher: &dyn Hasher,
    root: Option<S::Id>,
    path: &NibblePath,
) -> Result<MpfProof> {
    let mut steps = Vec::new();
    let mut id = match root {
        Some(id) => id,
        None => return Ok(MpfProof::new(steps)),
    };
    let mut cursor = 0usize;

    loop {
        let rest = path.suffix(cursor);
        match source.load(&id)? {
            WalkNode::Leaf { suffix, value_hash } => {
                if suffix == rest {
                    return Ok(MpfProof::new(steps));
                }
                if suffix.len() != rest.len() {
                    return Err(mixed_lengths(path));
                }
                steps.push(ProofStep::Leaf {
                    skip: rest.common_prefix_len(&suffix),
                    key: path.prefix(cursor).concat(&suffix).to_bytes(),
                    value: value_hash,
                });
                return Ok(MpfProof::new(steps));
            }
            WalkNode::Branch {
                prefix,
                children,
                value_hash,
                root,
            } => {
                let common = rest.common_prefix_len(&prefix);
                if common < prefix.len() {
                    if common == rest.len() {
                        return Err(mixed_lengths(path));
                    }
                    // the path leaves this branch's prefix: it would fork here
                    steps.push(ProofStep::Fork {
                        skip: common,
                        neighbor: Neighbor {
                            nibble: prefix.get(common),
                            prefix: prefix.suffix(common + 1),
                            root,
                        },
                    });
                    return Ok(MpfProof::new(steps));
                }
                if rest.len() == prefix.len() {
                    return Err(mixed_lengths(path));
                }

                let skip = prefix.len();
                let me = rest.get(skip);
                let others: Vec<usize> = (0..RADIX)
                    .filter(|i| *i != me as usize && children[*i].is_some())
                    .collect();

                let next = match &children[me as usize] {
                    Some((child, _)) => child.clone(),
                    None => {
                        steps.push(branch_step(hasher, skip, &children, me, value_hash));
                        return Ok(MpfProof::new(steps));
                    }
                };

                match (others.as_slice(), value_hash) {
                    ([other], None) => {
                        let other = *other;
                        if let Some((other_id, _)) = &children[other] {
                            steps.push(sibling_step(source, path, cursor + skip, skip, other as u8, other_id)?);
                        }
                    }
                    _ => steps.push(branch_step(hasher, skip, &children, me, value_hash)),
                }
                cursor += skip + 1;
                id = next;
            }
        }
    }
}

fn branch_step<Id>(
    hasher: &dyn Hasher,
    skip: usize,
    children: &[Option<(Id, NodeHash)>; RADIX],
    me: u8,
    value: Option<NodeHash>,
) -> ProofStep {
    let mut hashes = [NodeHash::ZERO; RADIX];
    for (slot, child) in hashes.iter_mut().zip(children.iter()) {
        if let Some((_, hash)) = child {
            *slot = *hash;
        }
    }
    ProofStep::Branch {
        skip,
        neighbors: neighbors(hasher, &hashes, me),
        value,
    }
}

/// `Leaf` or `Fork` step for a branch whose only other child sits at `nibble`;
/// `depth` is the position of the branching nibble in the full path
fn sibling_step<S: ProofSource>(
    source: &S,
    path: &NibblePath,
    depth: usize,
    skip: usize,
    nibble: u8,
    other: &S::Id,
) -> Result<ProofStep> {
    Ok(match source.load(other)? {
        WalkNode::Leaf { suffix, value_hash } => ProofStep::Leaf {
            skip,
            key: path.prefix(depth).push(nibble).concat(&suffix).to_bytes(),
            value: value_hash,
        },
        WalkNode::Branch { prefix, root, .. } => ProofStep::Fork {
            skip,
            neighbor: Neighbor { nibble, prefix, root },
        },
    })
}

fn mixed_lengths(path: &NibblePath) -> Error {
    Error::InvalidKey(format!(
        "path {} ends on a branch or inside a shared prefix; proofs need keys of equal length",
        path
    ))
}
