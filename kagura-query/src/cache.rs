//! Query-result cache. An LRU of (collection, filter+options fingerprint)
//! to the ordered id list a query produced, stamped with the collection
//! version it was computed at. Any mutation bumps the collection version,
//! so stale entries miss without an explicit invalidation sweep.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use kagura_core::DocumentId;

/// Cache key: collection plus a canonical fingerprint of filter and
/// options.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    collection: String,
    fingerprint: String,
}

struct CachedEntry {
    version: u64,
    ids: Vec<DocumentId>,
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct QueryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Version-stamped LRU over query results. Capacity 0 disables caching
/// entirely; every probe is then a miss.
pub struct QueryCache {
    lru: Option<Mutex<LruCache<CacheKey, CachedEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: NonZeroUsize::new(capacity).map(|n| Mutex::new(LruCache::new(n))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fetch a cached id list if one exists at exactly the current
    /// collection version. A version mismatch evicts the stale entry.
    pub fn get(
        &self,
        collection: &str,
        fingerprint: &str,
        current_version: u64,
    ) -> Option<Vec<DocumentId>> {
        let Some(lru) = &self.lru else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        let key = CacheKey {
            collection: collection.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        let mut lru = lru.lock();
        match lru.get(&key) {
            Some(entry) if entry.version == current_version => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.ids.clone())
            }
            Some(_) => {
                lru.pop(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, collection: &str, fingerprint: &str, version: u64, ids: Vec<DocumentId>) {
        let Some(lru) = &self.lru else { return };
        let key = CacheKey {
            collection: collection.to_string(),
            fingerprint: fingerprint.to_string(),
        };
        lru.lock().put(key, CachedEntry { version, ids });
    }

    /// Drop every entry for a collection. Needed when a collection is
    /// dropped: a later collection of the same name restarts its version
    /// counter, which would otherwise resurrect stale entries.
    pub fn purge_collection(&self, collection: &str) {
        let Some(lru) = &self.lru else { return };
        let mut lru = lru.lock();
        let stale: Vec<CacheKey> = lru
            .iter()
            .filter(|(k, _)| k.collection == collection)
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            lru.pop(&key);
        }
    }

    pub fn stats(&self) -> QueryCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        QueryCacheStats {
            entries: self.lru.as_ref().map_or(0, |l| l.lock().len()),
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ns: &[usize]) -> Vec<DocumentId> {
        ns.iter().map(|n| DocumentId(format!("doc{n}"))).collect()
    }

    #[test]
    fn hit_at_matching_version() {
        let cache = QueryCache::new(8);
        cache.put("c", "q1", 3, ids(&[1, 2]));
        assert_eq!(cache.get("c", "q1", 3), Some(ids(&[1, 2])));
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn version_bump_invalidates() {
        let cache = QueryCache::new(8);
        cache.put("c", "q1", 3, ids(&[1]));
        assert_eq!(cache.get("c", "q1", 4), None);
        // The stale entry was evicted, not kept around.
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn purge_collection_clears_only_that_collection() {
        let cache = QueryCache::new(8);
        cache.put("a", "q", 1, ids(&[1]));
        cache.put("b", "q", 1, ids(&[2]));
        cache.purge_collection("a");
        assert_eq!(cache.get("a", "q", 1), None);
        assert_eq!(cache.get("b", "q", 1), Some(ids(&[2])));
    }

    #[test]
    fn zero_capacity_disables() {
        let cache = QueryCache::new(0);
        cache.put("c", "q", 1, ids(&[1]));
        assert_eq!(cache.get("c", "q", 1), None);
        assert_eq!(cache.stats().entries, 0);
    }
}
