use criterion::{black_box, criterion_group, criterion_main, Criterion};

use kagura_core::value::Value;
use kagura_core::DocumentId;
use kagura_index::{BTreeIndex, HashIndex, ShardedHashIndex};

fn id(n: usize) -> DocumentId {
    DocumentId(format!("doc{n:06}"))
}

fn bench_hash_insert(c: &mut Criterion) {
    c.bench_function("hash_insert_10k", |b| {
        b.iter(|| {
            let idx = HashIndex::new("bench.k", false, 16, 0);
            for n in 0..10_000 {
                idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
            }
            black_box(idx.len())
        })
    });
}

fn bench_hash_lookup(c: &mut Criterion) {
    let idx = HashIndex::new("bench.k", false, 16, 1024);
    for n in 0..10_000 {
        idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
    }
    c.bench_function("hash_lookup", |b| {
        let mut n = 0i64;
        b.iter(|| {
            n = (n + 7) % 10_000;
            black_box(idx.get(&Value::Int(n)))
        })
    });
}

fn bench_sharded_insert(c: &mut Criterion) {
    c.bench_function("sharded_insert_10k", |b| {
        b.iter(|| {
            let idx = ShardedHashIndex::new("bench.k", false, 16, 16, 0);
            for n in 0..10_000 {
                idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
            }
            black_box(idx.len())
        })
    });
}

fn bench_btree_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_10k", |b| {
        b.iter(|| {
            let idx = BTreeIndex::new("bench.t", false, 32);
            for n in 0..10_000 {
                idx.insert(&Value::Int((n * 7919) % 10_000), &id(n as usize)).unwrap();
            }
            black_box(idx.len())
        })
    });
}

fn bench_btree_range(c: &mut Criterion) {
    let idx = BTreeIndex::new("bench.t", false, 32);
    for n in 0..100_000 {
        idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
    }
    c.bench_function("btree_range_1k_of_100k", |b| {
        b.iter(|| {
            black_box(idx.range(
                Some(&Value::Int(40_000)),
                Some(&Value::Int(41_000)),
                true,
                false,
            ))
        })
    });
}

criterion_group!(
    benches,
    bench_hash_insert,
    bench_hash_lookup,
    bench_sharded_insert,
    bench_btree_insert,
    bench_btree_range
);
criterion_main!(benches);
