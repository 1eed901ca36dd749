//! Tree benchmarks
//!
//! ```bash
//! cargo bench --bench trie_bench
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use forestry_db::gc::{GcOptions, GcStrategy, RetentionPolicy};
use forestry_db::model::Blake2b256;
use forestry_db::store::MemoryColumn;
use forestry_db::{
    JellyfishMerkleTree, MemoryJmtStore, MemoryNodeStore, MemoryRootsIndex, MpfProof, NodeHash, RootsIndex,
    SecureTrie, SparseMerkleTree,
};
use std::collections::BTreeMap;
use std::hint::black_box;

fn keys(n: u32) -> Vec<Vec<u8>> {
    (0..n).map(|i| format!("account-{:08}", i).into_bytes()).collect()
}

fn filled_trie(store: &MemoryNodeStore, keys: &[Vec<u8>]) -> NodeHash {
    let mut trie = SecureTrie::new(store);
    for k in keys {
        trie.put(k, k).unwrap();
    }
    trie.root_hash()
}

fn bench_trie(c: &mut Criterion) {
    let keys = keys(1_000);
    c.bench_function("secure_trie_put_1k", |b| {
        b.iter_batched(
            || MemoryNodeStore::new(MemoryColumn::new()),
            |store| black_box(filled_trie(&store, &keys)),
            BatchSize::SmallInput,
        )
    });

    let store = MemoryNodeStore::new(MemoryColumn::new());
    let root = filled_trie(&store, &keys);
    let trie = SecureTrie::with_root(&store, root);
    c.bench_function("secure_trie_get", |b| b.iter(|| black_box(trie.get(&keys[500]).unwrap())));
    c.bench_function("secure_trie_proof_wire", |b| {
        b.iter(|| black_box(trie.get_proof_wire(&keys[500]).unwrap()))
    });

    let proof = MpfProof::from_wire(&trie.get_proof_wire(&keys[500]).unwrap()).unwrap();
    c.bench_function("secure_trie_verify", |b| {
        b.iter(|| black_box(SecureTrie::verify_inclusion(&Blake2b256, &root, &keys[500], &keys[500], &proof)))
    });
}

fn bench_smt(c: &mut Criterion) {
    let keys = keys(200);
    c.bench_function("smt_put_200", |b| {
        b.iter_batched(
            || MemoryNodeStore::new(MemoryColumn::new()),
            |store| {
                let mut smt = SparseMerkleTree::new(&store);
                for k in &keys {
                    smt.put(k, k).unwrap();
                }
                black_box(smt.root_hash())
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_jmt(c: &mut Criterion) {
    let keys = keys(1_000);
    let updates: BTreeMap<Vec<u8>, Option<Vec<u8>>> = keys.iter().map(|k| (k.clone(), Some(k.clone()))).collect();
    c.bench_function("jmt_commit_1k", |b| {
        b.iter_batched(
            MemoryJmtStore::new,
            |store| black_box(JellyfishMerkleTree::new(&store).commit(1, &updates).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_gc(c: &mut Criterion) {
    let keys = keys(500);
    c.bench_function("gc_mark_sweep_10_versions", |b| {
        b.iter_batched(
            || {
                let nodes = MemoryNodeStore::new(MemoryColumn::new());
                let roots = MemoryRootsIndex::new(MemoryColumn::new());
                let mut trie = SecureTrie::new(&nodes);
                for v in 0..10u8 {
                    for k in keys.iter().step_by(7) {
                        trie.put(k, &[v]).unwrap();
                    }
                    let version = roots.next_version().unwrap();
                    roots.put(version, &trie.root_hash()).unwrap();
                }
                (nodes, roots)
            },
            |(nodes, roots)| {
                let report = forestry_db::GcManager::new(&nodes, &roots)
                    .run(GcStrategy::InMemoryMarkSweep, &RetentionPolicy::KeepLatest(2), &GcOptions::default())
                    .unwrap();
                black_box(report)
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_trie, bench_smt, bench_jmt, bench_gc);
criterion_main!(benches);
