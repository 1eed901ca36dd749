//! StateTrees Integration Tests
//!
//! End-to-end tests over an on-disk database: commits, reopening, and proofs
//! that must stay byte-identical across processes.
//!
//! Run with:
//! ```bash
//! cargo test --test state_trees_integration
//! ```

use forestry_db::model::Blake2b256;
use forestry_db::proof::{to_aiken, to_json};
use forestry_db::store::StoreConfig;
use forestry_db::{Error, MpfProof, NodeStore, RootsIndex, SecureTrie, StateTrees};
use tempfile::tempdir;

fn fruit_store(trees: &StateTrees) -> (u64, forestry_db::NodeHash) {
    trees
        .update(|trie| {
            trie.put(b"mango", b"100")?;
            trie.put(b"apple", b"200")?;
            trie.put(b"orange", b"300")?;
            trie.put(b"apple", b"400")
        })
        .unwrap()
}

// ============================================================================
// Commit and Reopen Tests
// ============================================================================

#[test]
fn test_fruit_scenario_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fruit");

    let (root, wire) = {
        let trees = StateTrees::open_path(&path).unwrap();
        let (_, root) = fruit_store(&trees);
        let trie = trees.secure_trie(root);
        assert_eq!(trie.get(b"apple").unwrap(), Some(b"400".to_vec()));

        let proof = trie.get_proof(b"mango").unwrap();
        assert!(SecureTrie::verify_inclusion(&Blake2b256, &root, b"mango", b"100", &proof));
        trees.flush().unwrap();
        (root, trie.get_proof_wire(b"mango").unwrap())
    };

    let trees = StateTrees::open_path(&path).unwrap();
    let persisted = trees.roots_index().latest().unwrap().unwrap();
    assert_eq!(persisted, root);

    let again = trees.secure_trie(persisted).get_proof_wire(b"mango").unwrap();
    assert_eq!(again, wire, "proof bytes differ after reopen");

    let decoded = MpfProof::from_wire(&again).unwrap();
    assert!(SecureTrie::verify_inclusion(&Blake2b256, &persisted, b"mango", b"100", &decoded));
    assert!(!SecureTrie::verify_inclusion(&Blake2b256, &persisted, b"mango", b"101", &decoded));
}

#[test]
fn test_versions_are_monotonic_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("versions");

    {
        let trees = StateTrees::open_path(&path).unwrap();
        assert_eq!(trees.update(|t| t.put(b"a", b"1")).unwrap().0, 0);
        assert_eq!(trees.update(|t| t.put(b"b", b"2")).unwrap().0, 1);
    }

    let trees = StateTrees::open_path(&path).unwrap();
    let (version, _) = trees.update(|t| t.put(b"c", b"3")).unwrap();
    assert_eq!(version, 2);

    let all = trees.roots_index().list_all().unwrap();
    assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(trees.trie_at(0).unwrap().get(b"b").unwrap(), None);
    assert_eq!(trees.trie_at(2).unwrap().get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_commit_of_detached_trie() {
    let dir = tempdir().unwrap();
    let trees = StateTrees::open_path(dir.path()).unwrap();

    let mut trie = trees.latest_trie().unwrap();
    trie.put(b"k", b"v").unwrap();
    let version = trees.commit(&trie).unwrap();
    assert_eq!(trees.roots_index().get(version).unwrap(), Some(trie.root_hash()));
}

#[test]
fn test_missing_column_family_without_creation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("strict");

    // a database that only knows the default column family
    {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        rocksdb::DB::open(&opts, &path).unwrap();
    }

    let config = StoreConfig {
        create_missing_column_families: false,
        ..StoreConfig::new(&path)
    };
    assert!(matches!(StateTrees::open(&config), Err(Error::Config(_))));
}

// ============================================================================
// Proof Rendering Tests
// ============================================================================

#[test]
fn test_exclusion_proof_renders() {
    let dir = tempdir().unwrap();
    let trees = StateTrees::open_path(dir.path()).unwrap();
    let (_, root) = fruit_store(&trees);

    let trie = trees.secure_trie(root);
    let wire = trie.get_proof_wire(b"kiwi").unwrap();
    let proof = MpfProof::from_wire(&wire).unwrap();
    assert!(SecureTrie::verify_exclusion(&Blake2b256, &root, b"kiwi", &proof));

    let json: serde_json::Value = serde_json::from_str(&to_json(&wire).unwrap()).unwrap();
    assert!(json.as_array().map(|steps| !steps.is_empty()).unwrap_or(false));
    let aiken = to_aiken(&wire).unwrap();
    assert!(aiken.starts_with('[') && aiken.ends_with(']'));
}

#[test]
fn test_order_independent_roots_on_disk() {
    let dir = tempdir().unwrap();
    let trees = StateTrees::open_path(dir.path()).unwrap();

    let keys: Vec<Vec<u8>> = (0..50u32).map(|i| format!("key-{}", i).into_bytes()).collect();
    let mut forward = trees.secure_trie(forestry_db::NodeHash::ZERO);
    for k in &keys {
        forward.put(k, k).unwrap();
    }
    let mut backward = trees.secure_trie(forestry_db::NodeHash::ZERO);
    for k in keys.iter().rev() {
        backward.put(k, k).unwrap();
    }
    assert_eq!(forward.root_hash(), backward.root_hash());
    assert!(trees.node_store().contains(&forward.root_hash()).unwrap());
}
