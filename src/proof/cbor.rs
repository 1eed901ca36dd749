//! The CBOR subset proofs are written in
//!
//! Only unsigned integers, definite-length byte strings, definite-length
//! arrays and tags are supported. Encoding always uses the shortest head;
//! anything else on the decoding side (indefinite lengths, maps, text,
//! floats, trailing bytes) is rejected as a malformed proof.

use crate::{Error, Result};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_BYTES: u8 = 2;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_TAG: u8 = 6;

/// Arrays and tags nest at most this deep
const MAX_DEPTH: usize = 16;

/// A decoded CBOR data item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    Unsigned(u64),
    Bytes(Vec<u8>),
    Array(Vec<Item>),
    Tag(u64, Box<Item>),
}

impl Item {
    pub fn tagged(tag: u64, items: Vec<Item>) -> Item {
        Item::Tag(tag, Box::new(Item::Array(items)))
    }

    pub fn as_unsigned(&self) -> Result<u64> {
        match self {
            Item::Unsigned(n) => Ok(*n),
            other => Err(unexpected("unsigned integer", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Item::Bytes(b) => Ok(b),
            other => Err(unexpected("byte string", other)),
        }
    }

    pub fn as_array(&self) -> Result<&[Item]> {
        match self {
            Item::Array(items) => Ok(items),
            other => Err(unexpected("array", other)),
        }
    }

    /// Tag number and the array it wraps
    pub fn as_tagged_array(&self) -> Result<(u64, &[Item])> {
        match self {
            Item::Tag(tag, inner) => Ok((*tag, inner.as_array()?)),
            other => Err(unexpected("tagged array", other)),
        }
    }
}

fn unexpected(wanted: &str, got: &Item) -> Error {
    let kind = match got {
        Item::Unsigned(_) => "unsigned integer",
        Item::Bytes(_) => "byte string",
        Item::Array(_) => "array",
        Item::Tag(..) => "tag",
    };
    Error::MalformedProof(format!("expected {}, found {}", wanted, kind))
}

pub fn encode(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    write_item(&mut out, item);
    out
}

fn write_item(out: &mut Vec<u8>, item: &Item) {
    match item {
        Item::Unsigned(n) => write_head(out, MAJOR_UNSIGNED, *n),
        Item::Bytes(b) => {
            write_head(out, MAJOR_BYTES, b.len() as u64);
            out.extend_from_slice(b);
        }
        Item::Array(items) => {
            write_head(out, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                write_item(out, item);
            }
        }
        Item::Tag(tag, inner) => {
            write_head(out, MAJOR_TAG, *tag);
            write_item(out, inner);
        }
    }
}

fn write_head(out: &mut Vec<u8>, major: u8, value: u64) {
    let major = major << 5;
    if value < 24 {
        out.push(major | value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(major | 24);
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(major | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(major | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(major | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decode exactly one item spanning all of `bytes`
pub fn decode(bytes: &[u8]) -> Result<Item> {
    let mut reader = Reader { bytes, pos: 0 };
    let item = reader.item(0)?;
    if reader.pos != bytes.len() {
        return Err(Error::MalformedProof(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }
    Ok(item)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::MalformedProof("unexpected end of input".into()))?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn head(&mut self) -> Result<(u8, u64)> {
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;
        let value = match info {
            0..=23 => info as u64,
            24 => self.take(1)?[0] as u64,
            25 => u16::from_be_bytes([self.take(1)?[0], self.take(1)?[0]]) as u64,
            26 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(self.take(4)?);
                u32::from_be_bytes(buf) as u64
            }
            27 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.take(8)?);
                u64::from_be_bytes(buf)
            }
            31 => {
                return Err(Error::MalformedProof(
                    "indefinite-length items are not allowed".into(),
                ))
            }
            _ => {
                return Err(Error::MalformedProof(format!(
                    "reserved additional info {}",
                    info
                )))
            }
        };
        Ok((major, value))
    }

    fn item(&mut self, depth: usize) -> Result<Item> {
        if depth > MAX_DEPTH {
            return Err(Error::MalformedProof("nesting too deep".into()));
        }
        let (major, value) = self.head()?;
        match major {
            MAJOR_UNSIGNED => Ok(Item::Unsigned(value)),
            MAJOR_BYTES => {
                let len = usize::try_from(value)
                    .map_err(|_| Error::MalformedProof("byte string too long".into()))?;
                Ok(Item::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_ARRAY => {
                // every element needs at least one byte
                let remaining = (self.bytes.len() - self.pos) as u64;
                if value > remaining {
                    return Err(Error::MalformedProof("array longer than input".into()));
                }
                let mut items = Vec::with_capacity(value as usize);
                for _ in 0..value {
                    items.push(self.item(depth + 1)?);
                }
                Ok(Item::Array(items))
            }
            MAJOR_TAG => Ok(Item::Tag(value, Box::new(self.item(depth + 1)?))),
            other => Err(Error::MalformedProof(format!(
                "unsupported major type {}",
                other
            ))),
        }
    }
}
