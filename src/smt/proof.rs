//! Sparse tree proofs and their compact wire form
//!
//! ```text
//! [kind: 0 inclusion | 1 non-inclusion, bitmap: bytes(32), siblings: bytes(32 * k)]
//! ```
//! Bit `i` of the bitmap (most significant bit first) is set when sibling `i`,
//! counted from the leaf, differs from the empty digest at its depth; only
//! those `k` siblings are transmitted.

use super::{bit, EmptyHashes, SmtNode, SMT_DEPTH};
use crate::model::{Hasher, NodeHash, HASH_LEN};
use crate::proof::cbor::{self, Item};
use crate::{Error, Result};

const BITMAP_LEN: usize = SMT_DEPTH / 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmtProofKind {
    Inclusion,
    NonInclusion,
}

/// Sibling digests from the leaf slot up to the root
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmtProof {
    pub kind: SmtProofKind,
    /// `siblings[i]` sits at depth `256 - i`
    pub siblings: Vec<NodeHash>,
}

impl SmtProof {
    /// Fold the siblings over a leaf-slot digest
    fn compute_root(&self, hasher: &dyn Hasher, key_hash: &NodeHash, leaf: NodeHash) -> Option<NodeHash> {
        if self.siblings.len() != SMT_DEPTH {
            return None;
        }
        let mut acc = leaf;
        for (i, sibling) in self.siblings.iter().enumerate() {
            let depth = SMT_DEPTH - 1 - i;
            acc = if bit(key_hash, depth) {
                hasher.combine(sibling, &acc)
            } else {
                hasher.combine(&acc, sibling)
            };
        }
        Some(acc)
    }

    pub fn verify_inclusion(&self, hasher: &dyn Hasher, root: &NodeHash, key: &[u8], value: &[u8]) -> bool {
        let key_hash = hasher.digest(key);
        let leaf = SmtNode::leaf_digest(hasher, &key_hash, value);
        self.compute_root(hasher, &key_hash, leaf).as_ref() == Some(root)
    }

    pub fn verify_non_inclusion(&self, hasher: &dyn Hasher, root: &NodeHash, key: &[u8]) -> bool {
        let key_hash = hasher.digest(key);
        self.compute_root(hasher, &key_hash, NodeHash::ZERO).as_ref() == Some(root)
    }

    pub fn to_wire(&self, empty: &EmptyHashes) -> Vec<u8> {
        let mut bitmap = vec![0u8; BITMAP_LEN];
        let mut packed = Vec::new();
        for (i, sibling) in self.siblings.iter().enumerate().take(SMT_DEPTH) {
            if *sibling != empty.at(SMT_DEPTH - i) {
                bitmap[i / 8] |= 0x80 >> (i % 8);
                packed.extend_from_slice(sibling.as_bytes());
            }
        }
        let kind = match self.kind {
            SmtProofKind::Inclusion => 0,
            SmtProofKind::NonInclusion => 1,
        };
        cbor::encode(&Item::Array(vec![
            Item::Unsigned(kind),
            Item::Bytes(bitmap),
            Item::Bytes(packed),
        ]))
    }

    pub fn from_wire(bytes: &[u8], empty: &EmptyHashes) -> Result<Self> {
        let item = cbor::decode(bytes)?;
        let fields = item.as_array()?;
        if fields.len() != 3 {
            return Err(Error::MalformedProof(format!(
                "sparse proof has {} fields",
                fields.len()
            )));
        }
        let kind = match fields[0].as_unsigned()? {
            0 => SmtProofKind::Inclusion,
            1 => SmtProofKind::NonInclusion,
            other => {
                return Err(Error::MalformedProof(format!(
                    "unknown sparse proof kind {}",
                    other
                )))
            }
        };
        let bitmap = fields[1].as_bytes()?;
        if bitmap.len() != BITMAP_LEN {
            return Err(Error::MalformedProof(format!(
                "bitmap is {} bytes, expected {}",
                bitmap.len(),
                BITMAP_LEN
            )));
        }
        let packed = fields[2].as_bytes()?;
        let present = bitmap.iter().map(|b| b.count_ones() as usize).sum::<usize>();
        if packed.len() != present * HASH_LEN {
            return Err(Error::MalformedProof(format!(
                "{} sibling bytes for {} set bits",
                packed.len(),
                present
            )));
        }

        let mut chunks = packed.chunks_exact(HASH_LEN);
        let mut siblings = Vec::with_capacity(SMT_DEPTH);
        for i in 0..SMT_DEPTH {
            let set = bitmap[i / 8] & (0x80 >> (i % 8)) != 0;
            let sibling = if set {
                let chunk = chunks
                    .next()
                    .ok_or_else(|| Error::MalformedProof("missing sibling".into()))?;
                NodeHash::from_slice(chunk)?
            } else {
                empty.at(SMT_DEPTH - i)
            };
            siblings.push(sibling);
        }
        Ok(SmtProof { kind, siblings })
    }
}
