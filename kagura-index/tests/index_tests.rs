//! # Index Subsystem Integration Tests
//!
//! This test suite covers:
//! - Robin Hood invariants at scale and under deletion churn
//! - B+ tree structure under randomized insert/delete interleavings
//! - Manager-level coherence across bundles

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use kagura_core::config::IndexConfig;
use kagura_core::metrics::Histogram;
use kagura_core::value::Value;
use kagura_core::DocumentId;
use kagura_index::{BTreeIndex, HashIndex, IndexManager, IndexOptions};

fn id(n: usize) -> DocumentId {
    DocumentId(format!("doc{n:05}"))
}

#[test]
fn hash_index_survives_ten_thousand_key_churn() {
    let idx = HashIndex::new("churn.k", false, 16, 1024);
    for n in 0..10_000 {
        idx.insert(&Value::String(format!("k{n}")), &id(n)).unwrap();
    }
    idx.check_invariants().unwrap();
    assert_eq!(idx.len(), 10_000);

    // Delete every other key; backward shifts must keep all survivors
    // reachable and the table hole-free.
    for n in (0..10_000).step_by(2) {
        assert!(idx.remove(&Value::String(format!("k{n}")), &id(n)));
    }
    idx.check_invariants().unwrap();
    assert_eq!(idx.len(), 5_000);

    for n in 0..10_000 {
        let found = idx.get(&Value::String(format!("k{n}"))).is_some();
        assert_eq!(found, n % 2 == 1, "key k{n}");
    }

    let histogram = Histogram::probe_lengths();
    idx.record_probe_lengths(&histogram);
    let stats = histogram.stats();
    assert_eq!(stats.count, 5_000);
    // A 0.75-bounded Robin Hood table keeps mean probe length tiny.
    assert!(stats.mean < 3.0, "mean psl {}", stats.mean);
}

#[test]
fn hash_index_randomized_against_reference_model() {
    let mut rng = StdRng::seed_from_u64(7);
    let idx = HashIndex::new("model.k", false, 16, 0);
    let mut model: std::collections::HashMap<i64, std::collections::BTreeSet<usize>> =
        std::collections::HashMap::new();

    for _ in 0..20_000 {
        let key = rng.gen_range(0..500);
        let doc = rng.gen_range(0..50);
        if rng.gen_bool(0.6) {
            idx.insert(&Value::Int(key), &id(doc)).unwrap();
            model.entry(key).or_default().insert(doc);
        } else {
            let removed = idx.remove(&Value::Int(key), &id(doc));
            let model_removed = model.get_mut(&key).is_some_and(|s| s.remove(&doc));
            assert_eq!(removed, model_removed);
        }
    }
    idx.check_invariants().unwrap();

    for (key, docs) in &model {
        let got: usize = idx.get(&Value::Int(*key)).map_or(0, |ids| ids.len());
        assert_eq!(got, docs.len(), "key {key}");
    }
}

#[test]
fn btree_randomized_churn_keeps_structure() {
    let mut rng = StdRng::seed_from_u64(42);
    let idx = BTreeIndex::with_order("churn.t", false, 8);
    let mut live: Vec<(i64, usize)> = Vec::new();

    for n in 0..5_000 {
        let key = rng.gen_range(0..1_000);
        idx.insert(&Value::Int(key), &id(n)).unwrap();
        live.push((key, n));
        if n % 3 == 0 && !live.is_empty() {
            let victim = rng.gen_range(0..live.len());
            let (key, doc) = live.swap_remove(victim);
            assert!(idx.remove(&Value::Int(key), &id(doc)));
        }
    }
    idx.check_invariants().unwrap();
    assert_eq!(idx.len(), live.len());

    // The leaf chain is the sorted multiset of all live entries.
    let mut expected: Vec<i64> = live.iter().map(|(k, _)| *k).collect();
    expected.sort_unstable();
    let walked: Vec<i64> = idx
        .iter_all()
        .into_iter()
        .map(|(v, _)| match v {
            Value::Int(i) => i,
            other => panic!("unexpected {other}"),
        })
        .collect();
    assert_eq!(walked, expected);
}

#[test]
fn btree_drain_to_empty_and_refill() {
    let idx = BTreeIndex::with_order("drain.t", false, 4);
    let mut order: Vec<usize> = (0..512).collect();
    let mut rng = StdRng::seed_from_u64(3);
    order.shuffle(&mut rng);

    for &n in &order {
        idx.insert(&Value::Int(n as i64), &id(n)).unwrap();
    }
    order.shuffle(&mut rng);
    for &n in &order {
        assert!(idx.remove(&Value::Int(n as i64), &id(n)));
    }
    assert!(idx.is_empty());
    assert_eq!(idx.stats().depth, 1);
    idx.check_invariants().unwrap();

    // A drained tree accepts fresh inserts.
    idx.insert(&Value::Int(1), &id(1)).unwrap();
    assert_eq!(idx.range(None, None, true, true), vec![id(1)]);
}

#[test]
fn manager_keeps_bundles_coherent_under_mixed_mutations() {
    let manager = IndexManager::new(IndexConfig::default());
    manager
        .create("events", "kind", IndexOptions::equality().sharded(8), std::iter::empty())
        .unwrap();
    manager
        .create("events", "priority", IndexOptions::ordered(), std::iter::empty())
        .unwrap();

    let mut rng = StdRng::seed_from_u64(11);
    let mut bodies: Vec<Option<Value>> = vec![None; 400];

    for step in 0..4_000 {
        let doc = rng.gen_range(0..400);
        let old = bodies[doc].clone();
        if rng.gen_bool(0.7) {
            let new = Value::object(vec![
                ("kind", Value::String(format!("k{}", rng.gen_range(0..5)))),
                ("priority", Value::Int(rng.gen_range(0..100))),
            ]);
            manager
                .apply_mutation("events", &id(doc), old.as_ref(), Some(&new))
                .unwrap_or_else(|e| panic!("step {step}: {e}"));
            bodies[doc] = Some(new);
        } else if old.is_some() {
            manager
                .apply_mutation("events", &id(doc), old.as_ref(), None)
                .unwrap();
            bodies[doc] = None;
        }
    }
    manager.check_invariants().unwrap();

    // Every live (value, id) pair is findable; every dead one is gone.
    for (doc, body) in bodies.iter().enumerate() {
        if let Some(body) = body {
            let kind = body.get("kind").unwrap();
            let hits = manager.lookup_equal("events", "kind", kind).unwrap();
            assert!(hits.contains(&id(doc)), "doc {doc} missing under {kind}");
        }
    }
    let live = bodies.iter().flatten().count();
    let all_priorities = manager
        .lookup_range("events", "priority", None, None, true, true)
        .unwrap();
    assert_eq!(all_priorities.len(), live);
}
