//! Radix-16 forestry commitments shared by the Patricia trie, the jellyfish
//! tree and the proof verifier
//!
//! - leaf: `H(suffix_encoding ++ H(value))`
//! - branch: `H(prefix_nibbles ++ merkle16(children))`, empty slots are the null hash
//! - a branch that also holds a value mixes `leaf(EMPTY, H(value))` into its merkle root

use super::{Hasher, NibblePath, NodeHash};

/// Number of children of a radix-16 branch
pub const RADIX: usize = 16;

/// Encode a leaf suffix: `0xff ++ packed` for even lengths,
/// `0x00 ++ first nibble ++ packed rest` for odd lengths
pub fn suffix_encoding(suffix: &NibblePath) -> Vec<u8> {
    if suffix.len() % 2 == 0 {
        let mut out = vec![0xff];
        out.extend(suffix.to_bytes());
        out
    } else {
        let mut out = vec![0x00, suffix.get(0)];
        out.extend(suffix.suffix(1).to_bytes());
        out
    }
}

/// Commitment of a leaf whose remaining path is `suffix`
pub fn leaf_commitment(hasher: &dyn Hasher, suffix: &NibblePath, value_hash: &NodeHash) -> NodeHash {
    hasher.digest_many(&[&suffix_encoding(suffix), value_hash.as_bytes()])
}

/// Commitment of a branch with skipped nibbles `prefix` over an already merkleized root
pub fn branch_commitment(hasher: &dyn Hasher, prefix: &NibblePath, root: &NodeHash) -> NodeHash {
    hasher.digest_many(&[&prefix.to_nibble_bytes(), root.as_bytes()])
}

/// Merkle root of the contiguous range `[start, start + len)` of 16 child slots
pub fn merkle_range(hasher: &dyn Hasher, children: &[NodeHash; RADIX], start: usize, len: usize) -> NodeHash {
    if len == 1 {
        return children[start];
    }
    let half = len / 2;
    let left = merkle_range(hasher, children, start, half);
    let right = merkle_range(hasher, children, start + half, half);
    hasher.combine(&left, &right)
}

/// Merkle root over all 16 slots
pub fn merkle_root16(hasher: &dyn Hasher, children: &[NodeHash; RADIX]) -> NodeHash {
    merkle_range(hasher, children, 0, RADIX)
}

/// Merkle root of a branch, folding in its own value when it has one
pub fn branch_root(hasher: &dyn Hasher, children: &[NodeHash; RADIX], value_hash: Option<&NodeHash>) -> NodeHash {
    let root = merkle_root16(hasher, children);
    match value_hash {
        Some(vh) => {
            let leaf = leaf_commitment(hasher, &NibblePath::empty(), vh);
            hasher.combine(&root, &leaf)
        }
        None => root,
    }
}

/// The four sibling roots on the path from slot `me` to the top of the 16-ary merkle tree,
/// largest subtree first
pub fn neighbors(hasher: &dyn Hasher, children: &[NodeHash; RADIX], me: u8) -> [NodeHash; 4] {
    let me = me as usize;
    let mut out = [NodeHash::ZERO; 4];
    let mut pivot = 8usize;
    let mut n = 8usize;
    for slot in out.iter_mut() {
        if me < pivot {
            *slot = merkle_range(hasher, children, pivot, n);
            pivot -= n / 2;
        } else {
            *slot = merkle_range(hasher, children, pivot - n, n);
            pivot += n / 2;
        }
        n /= 2;
    }
    out
}

/// Rebuild the 16-ary merkle root from one known slot and its four neighbors
pub fn merkle16_from_neighbors(hasher: &dyn Hasher, me: u8, root: NodeHash, neighbors: &[NodeHash; 4]) -> NodeHash {
    // walk up from the smallest neighbor; bit `level` of `me` says which side we are on
    neighbors
        .iter()
        .rev()
        .enumerate()
        .fold(root, |acc, (level, sibling)| {
            if (me >> level) & 1 == 0 {
                hasher.combine(&acc, sibling)
            } else {
                hasher.combine(sibling, &acc)
            }
        })
}

/// Merkle root of a branch with exactly two occupied slots
pub fn sparse_merkle16(hasher: &dyn Hasher, me: u8, me_hash: NodeHash, other: u8, other_hash: NodeHash) -> NodeHash {
    let mut children = [NodeHash::ZERO; RADIX];
    children[me as usize] = me_hash;
    children[other as usize] = other_hash;
    merkle_root16(hasher, &children)
}
