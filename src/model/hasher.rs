//! Pluggable hash functions

use super::NodeHash;

/// A 256-bit hash function used for node commitments and key hashing
pub trait Hasher: Send + Sync {
    /// Hash the concatenation of `parts`
    fn digest_many(&self, parts: &[&[u8]]) -> NodeHash;

    /// Short identifier, e.g. for logging
    fn name(&self) -> &'static str;

    /// Hash arbitrary data
    fn digest(&self, data: &[u8]) -> NodeHash {
        self.digest_many(&[data])
    }

    /// Hash the concatenation of two digests
    fn combine(&self, left: &NodeHash, right: &NodeHash) -> NodeHash {
        self.digest_many(&[left.as_bytes(), right.as_bytes()])
    }
}

/// Blake2b with a 32-byte output; the default, and the hash the on-chain verifier uses
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake2b256;

impl Hasher for Blake2b256 {
    fn digest_many(&self, parts: &[&[u8]]) -> NodeHash {
        let mut state = blake2b_simd::Params::new().hash_length(32).to_state();
        for part in parts {
            state.update(part);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(state.finalize().as_bytes());
        NodeHash::from_bytes(out)
    }

    fn name(&self) -> &'static str {
        "blake2b-256"
    }
}

/// BLAKE3, for stores that never need on-chain verification
#[derive(Clone, Copy, Debug, Default)]
pub struct Blake3;

impl Hasher for Blake3 {
    fn digest_many(&self, parts: &[&[u8]]) -> NodeHash {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        NodeHash::from_bytes(*hasher.finalize().as_bytes())
    }

    fn name(&self) -> &'static str {
        "blake3"
    }
}
