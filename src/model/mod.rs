//! Core data model types: digests, hash functions, nibble paths and commitments

mod hash;
mod hasher;
pub mod merkle;
mod nibble;

pub use hash::{NodeHash, HASH_LEN};
pub use hasher::{Blake2b256, Blake3, Hasher};
pub use nibble::NibblePath;
