//! Keys decomposed into 4-bit nibbles for radix traversal

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable sequence of nibbles (values in `0..=15`)
///
/// Serialized in packed form: a parity flag plus two nibbles per byte, with
/// odd-length paths padded by a leading zero nibble.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "PackedNibbles", try_from = "PackedNibbles")]
pub struct NibblePath {
    nibbles: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct PackedNibbles {
    odd: bool,
    bytes: Vec<u8>,
}

impl NibblePath {
    /// The empty path
    pub fn empty() -> Self {
        NibblePath::default()
    }

    /// Split every byte into its high and low nibble
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for b in bytes {
            nibbles.push(b >> 4);
            nibbles.push(b & 0x0f);
        }
        NibblePath { nibbles }
    }

    /// Build from explicit nibble values
    pub fn from_nibbles(nibbles: &[u8]) -> Result<Self> {
        if let Some(bad) = nibbles.iter().find(|n| **n > 0x0f) {
            return Err(Error::InvalidNibble(format!("{} is out of range", bad)));
        }
        Ok(NibblePath {
            nibbles: nibbles.to_vec(),
        })
    }

    /// Parse a hex string, one nibble per character; a `0x` prefix is accepted
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let nibbles = s
            .chars()
            .enumerate()
            .map(|(i, c)| {
                c.to_digit(16).map(|d| d as u8).ok_or_else(|| {
                    Error::InvalidNibble(format!("invalid hex character {:?} at {}", c, i))
                })
            })
            .collect::<Result<Vec<u8>>>()?;
        Ok(NibblePath { nibbles })
    }

    pub fn len(&self) -> usize {
        self.nibbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nibbles.is_empty()
    }

    /// Nibble at `index`
    ///
    /// # Panics
    /// Panics if `index >= len()`.
    pub fn get(&self, index: usize) -> u8 {
        self.nibbles[index]
    }

    pub fn as_nibbles(&self) -> &[u8] {
        &self.nibbles
    }

    /// Nibbles in `[start, end)`; both bounds are clamped to the path length
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.nibbles.len());
        let start = start.min(end);
        NibblePath {
            nibbles: self.nibbles[start..end].to_vec(),
        }
    }

    /// The first `len` nibbles
    pub fn prefix(&self, len: usize) -> Self {
        self.slice(0, len)
    }

    /// Everything from `start` on
    pub fn suffix(&self, start: usize) -> Self {
        self.slice(start, self.nibbles.len())
    }

    pub fn concat(&self, other: &NibblePath) -> Self {
        let mut nibbles = Vec::with_capacity(self.len() + other.len());
        nibbles.extend_from_slice(&self.nibbles);
        nibbles.extend_from_slice(&other.nibbles);
        NibblePath { nibbles }
    }

    /// This path followed by a single nibble
    pub fn push(&self, nibble: u8) -> Self {
        let mut nibbles = self.nibbles.clone();
        nibbles.push(nibble & 0x0f);
        NibblePath { nibbles }
    }

    pub fn starts_with(&self, prefix: &NibblePath) -> bool {
        self.nibbles.starts_with(&prefix.nibbles)
    }

    pub fn common_prefix_len(&self, other: &NibblePath) -> usize {
        self.nibbles
            .iter()
            .zip(other.nibbles.iter())
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Pack two nibbles per byte; odd-length paths get a leading zero nibble
    pub fn to_bytes(&self) -> Vec<u8> {
        let pad = self.nibbles.len() % 2;
        let mut out = Vec::with_capacity((self.nibbles.len() + 1) / 2);
        let mut iter = std::iter::repeat(0u8).take(pad).chain(self.nibbles.iter().copied());
        while let (Some(hi), Some(lo)) = (iter.next(), iter.next()) {
            out.push((hi << 4) | lo);
        }
        out
    }

    /// One byte per nibble, the layout commitments and proof prefixes use
    pub fn to_nibble_bytes(&self) -> Vec<u8> {
        self.nibbles.clone()
    }

    pub fn to_hex(&self) -> String {
        self.nibbles
            .iter()
            .map(|n| char::from_digit(*n as u32, 16).unwrap_or('0'))
            .collect()
    }
}

impl From<NibblePath> for PackedNibbles {
    fn from(path: NibblePath) -> Self {
        PackedNibbles {
            odd: path.len() % 2 == 1,
            bytes: path.to_bytes(),
        }
    }
}

impl TryFrom<PackedNibbles> for NibblePath {
    type Error = Error;

    fn try_from(packed: PackedNibbles) -> Result<Self> {
        let full = NibblePath::from_bytes(&packed.bytes);
        if !packed.odd {
            return Ok(full);
        }
        if full.is_empty() || full.get(0) != 0 {
            return Err(Error::InvalidNibble(
                "odd-length path must carry a zero pad nibble".into(),
            ));
        }
        Ok(full.suffix(1))
    }
}

impl fmt::Debug for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NibblePath({})", self.to_hex())
    }
}

impl fmt::Display for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_splits_nibbles() {
        let path = NibblePath::from_bytes(&[0xab, 0x01]);
        assert_eq!(path.as_nibbles(), &[0xa, 0xb, 0x0, 0x1]);
        assert_eq!(path.to_bytes(), vec![0xab, 0x01]);
    }

    #[test]
    fn test_from_hex_accepts_prefix_and_odd_length() {
        let path = NibblePath::from_hex("0xabc").unwrap();
        assert_eq!(path.as_nibbles(), &[0xa, 0xb, 0xc]);
        assert_eq!(path.to_bytes(), vec![0x0a, 0xbc]);
        assert!(matches!(
            NibblePath::from_hex("12g4"),
            Err(Error::InvalidNibble(_))
        ));
    }

    #[test]
    fn test_from_nibbles_validates_range() {
        assert!(NibblePath::from_nibbles(&[1, 15]).is_ok());
        assert!(NibblePath::from_nibbles(&[16]).is_err());
    }

    #[test]
    fn test_slicing_and_common_prefix() {
        let a = NibblePath::from_hex("abcdef").unwrap();
        let b = NibblePath::from_hex("abcf").unwrap();
        assert_eq!(a.common_prefix_len(&b), 3);
        assert_eq!(a.prefix(2).to_hex(), "ab");
        assert_eq!(a.suffix(4).to_hex(), "ef");
        assert_eq!(a.slice(1, 3).to_hex(), "bc");
        assert!(a.starts_with(&a.prefix(3)));
        assert_eq!(a.prefix(2).concat(&a.suffix(2)), a);
        assert_eq!(a.prefix(1).push(0xb).to_hex(), "ab");
    }

    #[test]
    fn test_serde_preserves_parity() {
        for hex in ["", "a", "ab", "0", "00", "f0f"] {
            let path = NibblePath::from_hex(hex).unwrap();
            let bytes = bincode::serialize(&path).unwrap();
            let back: NibblePath = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, path, "parity lost for {:?}", hex);
        }
    }
}
