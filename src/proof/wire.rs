//! MPF wire format
//!
//! ```text
//! proof  = [ step* ]
//! Branch = 121([skip, neighbors: bytes(128), ? value: bytes(32)])
//! Fork   = 122([skip, 121([nibble, prefix: bytes(one nibble per byte), root: bytes(32)])])
//! Leaf   = 123([skip, key: bytes, value: bytes(32)])
//! ```

use super::cbor::{self, Item};
use super::{MpfProof, Neighbor, ProofStep};
use crate::model::{NibblePath, NodeHash, HASH_LEN};
use crate::{Error, Result};

pub const TAG_BRANCH: u64 = 121;
pub const TAG_FORK: u64 = 122;
pub const TAG_LEAF: u64 = 123;

pub fn encode(proof: &MpfProof) -> Vec<u8> {
    let steps = proof.steps.iter().map(encode_step).collect();
    cbor::encode(&Item::Array(steps))
}

fn encode_step(step: &ProofStep) -> Item {
    match step {
        ProofStep::Branch { skip, neighbors, value } => {
            let mut concat = Vec::with_capacity(4 * HASH_LEN);
            for n in neighbors {
                concat.extend_from_slice(n.as_bytes());
            }
            let mut fields = vec![Item::Unsigned(*skip as u64), Item::Bytes(concat)];
            if let Some(vh) = value {
                fields.push(Item::Bytes(vh.as_bytes().to_vec()));
            }
            Item::tagged(TAG_BRANCH, fields)
        }
        ProofStep::Fork { skip, neighbor } => {
            let inner = Item::tagged(
                TAG_BRANCH,
                vec![
                    Item::Unsigned(neighbor.nibble as u64),
                    Item::Bytes(neighbor.prefix.to_nibble_bytes()),
                    Item::Bytes(neighbor.root.as_bytes().to_vec()),
                ],
            );
            Item::tagged(TAG_FORK, vec![Item::Unsigned(*skip as u64), inner])
        }
        ProofStep::Leaf { skip, key, value } => Item::tagged(
            TAG_LEAF,
            vec![
                Item::Unsigned(*skip as u64),
                Item::Bytes(key.clone()),
                Item::Bytes(value.as_bytes().to_vec()),
            ],
        ),
    }
}

pub fn decode(bytes: &[u8]) -> Result<MpfProof> {
    let item = cbor::decode(bytes)?;
    let steps = item
        .as_array()?
        .iter()
        .map(decode_step)
        .collect::<Result<Vec<_>>>()?;
    Ok(MpfProof { steps })
}

fn decode_step(item: &Item) -> Result<ProofStep> {
    let (tag, fields) = item.as_tagged_array()?;
    match tag {
        TAG_BRANCH => {
            if fields.len() != 2 && fields.len() != 3 {
                return Err(arity("branch", fields.len()));
            }
            let skip = decode_skip(&fields[0])?;
            let concat = fields[1].as_bytes()?;
            if concat.len() != 4 * HASH_LEN {
                return Err(Error::MalformedProof(format!(
                    "branch neighbors are {} bytes, expected {}",
                    concat.len(),
                    4 * HASH_LEN
                )));
            }
            let mut neighbors = [NodeHash::ZERO; 4];
            for (slot, chunk) in neighbors.iter_mut().zip(concat.chunks_exact(HASH_LEN)) {
                *slot = decode_hash(chunk)?;
            }
            let value = match fields.get(2) {
                Some(v) => Some(decode_hash(v.as_bytes()?)?),
                None => None,
            };
            Ok(ProofStep::Branch { skip, neighbors, value })
        }
        TAG_FORK => {
            if fields.len() != 2 {
                return Err(arity("fork", fields.len()));
            }
            let skip = decode_skip(&fields[0])?;
            let (inner_tag, inner) = fields[1].as_tagged_array()?;
            if inner_tag != TAG_BRANCH || inner.len() != 3 {
                return Err(Error::MalformedProof("fork neighbor is not 121([nibble, prefix, root])".into()));
            }
            let nibble = inner[0].as_unsigned()?;
            if nibble > 0x0f {
                return Err(Error::MalformedProof(format!("neighbor nibble {} out of range", nibble)));
            }
            let prefix = NibblePath::from_nibbles(inner[1].as_bytes()?)
                .map_err(|e| Error::MalformedProof(format!("neighbor prefix: {}", e)))?;
            let root = decode_hash(inner[2].as_bytes()?)?;
            Ok(ProofStep::Fork {
                skip,
                neighbor: Neighbor {
                    nibble: nibble as u8,
                    prefix,
                    root,
                },
            })
        }
        TAG_LEAF => {
            if fields.len() != 3 {
                return Err(arity("leaf", fields.len()));
            }
            Ok(ProofStep::Leaf {
                skip: decode_skip(&fields[0])?,
                key: fields[1].as_bytes()?.to_vec(),
                value: decode_hash(fields[2].as_bytes()?)?,
            })
        }
        other => Err(Error::MalformedProof(format!("unknown step tag {}", other))),
    }
}

fn decode_skip(item: &Item) -> Result<usize> {
    usize::try_from(item.as_unsigned()?).map_err(|_| Error::MalformedProof("skip out of range".into()))
}

fn decode_hash(bytes: &[u8]) -> Result<NodeHash> {
    NodeHash::from_slice(bytes).map_err(|_| {
        Error::MalformedProof(format!("hash is {} bytes, expected {}", bytes.len(), HASH_LEN))
    })
}

fn arity(kind: &str, got: usize) -> Error {
    Error::MalformedProof(format!("{} step has {} fields", kind, got))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(b: u8) -> NodeHash {
        NodeHash::from_bytes([b; 32])
    }

    fn sample() -> MpfProof {
        MpfProof::new(vec![
            ProofStep::Branch {
                skip: 0,
                neighbors: [h(1), h(2), h(3), h(4)],
                value: None,
            },
            ProofStep::Fork {
                skip: 30,
                neighbor: Neighbor {
                    nibble: 7,
                    prefix: NibblePath::from_hex("0a1").unwrap(),
                    root: h(5),
                },
            },
            ProofStep::Leaf {
                skip: 2,
                key: vec![0xcd; 32],
                value: h(6),
            },
        ])
    }

    #[test]
    fn test_wire_layout() {
        let bytes = encode(&sample());
        // array(3), then tag 121 = d8 79, array(2), skip 0, bytes(128) = 58 80
        assert_eq!(&bytes[..7], &[0x83, 0xd8, 0x79, 0x82, 0x00, 0x58, 0x80]);
        assert_eq!(decode(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_fork_prefix_is_one_nibble_per_byte() {
        let proof = MpfProof::new(vec![sample().steps[1].clone()]);
        let bytes = encode(&proof);
        // 122([30, 121([7, h'000a01', root])])
        let expected_head = [0x81, 0xd8, 0x7a, 0x82, 0x18, 0x1e, 0xd8, 0x79, 0x83, 0x07, 0x43, 0x00, 0x0a, 0x01];
        assert_eq!(&bytes[..expected_head.len()], &expected_head);
    }

    #[test]
    fn test_branch_value_roundtrips() {
        let proof = MpfProof::new(vec![ProofStep::Branch {
            skip: 1,
            neighbors: [h(9); 4],
            value: Some(h(8)),
        }]);
        assert_eq!(decode(&encode(&proof)).unwrap(), proof);
    }

    #[test]
    fn test_decode_rejects_bad_steps() {
        let unknown_tag = cbor::encode(&Item::Array(vec![Item::tagged(124, vec![])]));
        assert!(matches!(decode(&unknown_tag), Err(Error::MalformedProof(_))));

        let short_hash = cbor::encode(&Item::Array(vec![Item::tagged(
            TAG_LEAF,
            vec![Item::Unsigned(0), Item::Bytes(vec![1]), Item::Bytes(vec![0; 31])],
        )]));
        assert!(matches!(decode(&short_hash), Err(Error::MalformedProof(_))));

        let wrong_arity = cbor::encode(&Item::Array(vec![Item::tagged(TAG_FORK, vec![Item::Unsigned(0)])]));
        assert!(matches!(decode(&wrong_arity), Err(Error::MalformedProof(_))));

        let mut trailing = encode(&sample());
        trailing.push(0);
        assert!(matches!(decode(&trailing), Err(Error::MalformedProof(_))));
    }
}
