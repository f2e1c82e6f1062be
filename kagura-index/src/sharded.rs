//! Sharded fan-out over independent Robin Hood tables.
//! Reduces write contention by routing each key to one of K shards with
//! a second mixer, decorrelated from the per-shard bucket hash.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kagura_core::metrics::Histogram;
use kagura_core::value::{shard_hash, Value};
use kagura_core::{DocumentId, Result};

use crate::hash::{HashIndex, HashIndexStats};

/// Fan-out of `shard_count` independent [`HashIndex`] instances.
/// `shard_count` must be a power of two; 16 is the usual default.
pub struct ShardedHashIndex {
    shards: Vec<HashIndex>,
    shard_mask: usize,
    requests: Vec<AtomicU64>,
}

/// Per-shard and aggregate statistics.
#[derive(Debug, Clone)]
pub struct ShardedStats {
    pub shard_count: usize,
    pub entries: usize,
    pub distinct_keys: usize,
    /// Max deviation of per-shard request counts from their mean,
    /// divided by the mean. 0.0 is a perfectly balanced fan-out.
    pub balance_score: f64,
    pub shards: Vec<HashIndexStats>,
}

impl ShardedHashIndex {
    pub fn new(
        label: &str,
        unique: bool,
        shard_count: usize,
        capacity_per_shard: usize,
        cache_entries: usize,
    ) -> Self {
        assert!(shard_count.is_power_of_two(), "shard count must be power of 2");
        let shards = (0..shard_count)
            .map(|n| {
                HashIndex::new(
                    format!("{label}[{n}]"),
                    unique,
                    capacity_per_shard,
                    cache_entries / shard_count.max(1),
                )
            })
            .collect();
        Self {
            shards,
            shard_mask: shard_count - 1,
            requests: (0..shard_count).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    #[inline]
    fn shard_for(&self, key: &Value) -> usize {
        shard_hash(&key.canonical_bytes()) as usize & self.shard_mask
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn insert(&self, key: &Value, id: &DocumentId) -> Result<()> {
        let shard = self.shard_for(key);
        self.requests[shard].fetch_add(1, Ordering::Relaxed);
        self.shards[shard].insert(key, id)
    }

    pub fn remove(&self, key: &Value, id: &DocumentId) -> bool {
        let shard = self.shard_for(key);
        self.requests[shard].fetch_add(1, Ordering::Relaxed);
        self.shards[shard].remove(key, id)
    }

    pub fn get(&self, key: &Value) -> Option<Arc<[DocumentId]>> {
        let shard = self.shard_for(key);
        self.requests[shard].fetch_add(1, Ordering::Relaxed);
        self.shards[shard].get(key)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.shards[self.shard_for(key)].contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(HashIndex::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(HashIndex::is_empty)
    }

    /// Visit every (key, ids) pair, shard by shard. No cross-shard
    /// ordering guarantee.
    pub fn for_each(&self, mut f: impl FnMut(&Value, &[DocumentId])) {
        for shard in &self.shards {
            shard.for_each(&mut f);
        }
    }

    pub fn record_probe_lengths(&self, histogram: &Histogram) {
        for shard in &self.shards {
            shard.record_probe_lengths(histogram);
        }
    }

    pub fn estimated_size(&self) -> usize {
        self.shards.iter().map(HashIndex::estimated_size).sum()
    }

    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (n, shard) in self.shards.iter().enumerate() {
            shard
                .check_invariants()
                .map_err(|e| format!("shard {n}: {e}"))?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ShardedStats {
        let shards: Vec<HashIndexStats> = self.shards.iter().map(HashIndex::stats).collect();
        let counts: Vec<u64> = self
            .requests
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        let mean = counts.iter().sum::<u64>() as f64 / counts.len() as f64;
        let balance_score = if mean > 0.0 {
            counts
                .iter()
                .map(|&c| (c as f64 - mean).abs())
                .fold(0.0, f64::max)
                / mean
        } else {
            0.0
        };
        ShardedStats {
            shard_count: self.shards.len(),
            entries: shards.iter().map(|s| s.entries).sum(),
            distinct_keys: shards.iter().map(|s| s.distinct_keys).sum(),
            balance_score,
            shards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> DocumentId {
        DocumentId(format!("doc{n}"))
    }

    #[test]
    fn operations_forward_to_one_shard() {
        let idx = ShardedHashIndex::new("c.f", false, 16, 16, 0);
        for n in 0..500 {
            idx.insert(&Value::String(format!("k{n}")), &id(n)).unwrap();
        }
        assert_eq!(idx.len(), 500);
        for n in 0..500 {
            assert!(idx.get(&Value::String(format!("k{n}"))).is_some());
        }
        assert!(idx.remove(&Value::String(format!("k7")), &id(7)));
        assert!(idx.get(&Value::String(format!("k7"))).is_none());
        idx.check_invariants().unwrap();
    }

    #[test]
    fn keys_spread_across_shards() {
        let idx = ShardedHashIndex::new("c.f", false, 16, 16, 0);
        for n in 0..2000 {
            idx.insert(&Value::String(format!("k{n}")), &id(n)).unwrap();
        }
        let stats = idx.stats();
        let populated = stats.shards.iter().filter(|s| s.entries > 0).count();
        assert!(populated >= 12, "only {populated} of 16 shards populated");
        // A uniform mixer keeps the worst shard within a few multiples
        // of the mean.
        assert!(stats.balance_score < 1.0, "balance {}", stats.balance_score);
    }

    #[test]
    fn iteration_covers_every_shard() {
        let idx = ShardedHashIndex::new("c.f", false, 8, 16, 0);
        for n in 0..100 {
            idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
        }
        let mut seen = 0;
        idx.for_each(|_, ids| seen += ids.len());
        assert_eq!(seen, 100);
    }
}
