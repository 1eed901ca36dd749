//! Human-readable renderings of wire proofs

use super::{MpfProof, ProofStep};
use crate::model::NodeHash;
use crate::Result;
use serde_json::{json, Value};

fn neighbors_hex(neighbors: &[NodeHash; 4]) -> String {
    neighbors.iter().map(|n| n.to_hex()).collect()
}

/// Pretty JSON array of steps, the shape off-chain JavaScript tooling loads
pub fn to_json(wire: &[u8]) -> Result<String> {
    let proof = MpfProof::from_wire(wire)?;
    let steps: Vec<Value> = proof
        .steps
        .iter()
        .map(|step| match step {
            ProofStep::Branch { skip, neighbors, value } => {
                let mut obj = json!({
                    "type": "branch",
                    "skip": skip,
                    "neighbors": neighbors_hex(neighbors),
                });
                if let Some(vh) = value {
                    obj["value"] = Value::String(vh.to_hex());
                }
                obj
            }
            ProofStep::Fork { skip, neighbor } => json!({
                "type": "fork",
                "skip": skip,
                "neighbor": {
                    "nibble": neighbor.nibble,
                    "prefix": hex::encode(neighbor.prefix.to_nibble_bytes()),
                    "root": neighbor.root.to_hex(),
                },
            }),
            ProofStep::Leaf { skip, key, value } => json!({
                "type": "leaf",
                "skip": skip,
                "neighbor": {
                    "key": hex::encode(key),
                    "value": value.to_hex(),
                },
            }),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&steps)?)
}

/// Aiken list literal of `ProofStep`s, ready to paste into validator tests
pub fn to_aiken(wire: &[u8]) -> Result<String> {
    let proof = MpfProof::from_wire(wire)?;
    let mut out = String::from("[\n");
    for step in &proof.steps {
        match step {
            ProofStep::Branch { skip, neighbors, value } => {
                out.push_str(&format!(
                    "  Branch {{ skip: {}, neighbors: #\"{}\"",
                    skip,
                    neighbors_hex(neighbors)
                ));
                if let Some(vh) = value {
                    out.push_str(&format!(", value: #\"{}\"", vh.to_hex()));
                }
                out.push_str(" },\n");
            }
            ProofStep::Fork { skip, neighbor } => out.push_str(&format!(
                "  Fork {{ skip: {}, neighbor: Neighbor {{ nibble: {}, prefix: #\"{}\", root: #\"{}\" }} }},\n",
                skip,
                neighbor.nibble,
                hex::encode(neighbor.prefix.to_nibble_bytes()),
                neighbor.root.to_hex()
            )),
            ProofStep::Leaf { skip, key, value } => out.push_str(&format!(
                "  Leaf {{ skip: {}, key: #\"{}\", value: #\"{}\" }},\n",
                skip,
                hex::encode(key),
                value.to_hex()
            )),
        }
    }
    out.push(']');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NibblePath;
    use crate::proof::Neighbor;

    fn sample_wire() -> Vec<u8> {
        MpfProof::new(vec![
            ProofStep::Fork {
                skip: 1,
                neighbor: Neighbor {
                    nibble: 3,
                    prefix: NibblePath::from_hex("ab").unwrap(),
                    root: NodeHash::from_bytes([0x11; 32]),
                },
            },
            ProofStep::Leaf {
                skip: 0,
                key: vec![0x12, 0x34],
                value: NodeHash::from_bytes([0x22; 32]),
            },
        ])
        .to_wire()
    }

    #[test]
    fn test_json_shape() {
        let json = to_json(&sample_wire()).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["type"], "fork");
        assert_eq!(parsed[0]["neighbor"]["nibble"], 3);
        assert_eq!(parsed[0]["neighbor"]["prefix"], "0a0b");
        assert_eq!(parsed[1]["type"], "leaf");
        assert_eq!(parsed[1]["neighbor"]["key"], "1234");
        assert_eq!(parsed[1]["skip"], 0);
    }

    #[test]
    fn test_aiken_literal() {
        let aiken = to_aiken(&sample_wire()).unwrap();
        let lines: Vec<&str> = aiken.lines().collect();
        assert_eq!(lines[0], "[");
        assert_eq!(
            lines[1],
            format!(
                "  Fork {{ skip: 1, neighbor: Neighbor {{ nibble: 3, prefix: #\"0a0b\", root: #\"{}\" }} }},",
                "11".repeat(32)
            )
        );
        assert_eq!(
            lines[2],
            format!("  Leaf {{ skip: 0, key: #\"1234\", value: #\"{}\" }},", "22".repeat(32))
        );
        assert_eq!(lines[3], "]");
    }

    #[test]
    fn test_renderers_reject_garbage() {
        assert!(to_json(&[0xff]).is_err());
        assert!(to_aiken(&[0x01]).is_err());
    }
}
