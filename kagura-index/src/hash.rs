//! # Robin Hood Hash Index
//!
//! Equality map from a field value to the identifiers of the documents
//! holding it. Single open-addressed bucket array, power-of-two capacity,
//! Robin Hood displacement on insert, backward-shift deletion. No
//! tombstones, ever.
//!
//! ## Probe discipline
//!
//! ```text
//! insert:  probe from ideal bucket carrying PSL 0; steal any slot whose
//!          incumbent is closer to home (suitor.psl > incumbent.psl) and
//!          continue with the displaced entry
//! lookup:  stop at an empty slot, or as soon as probe_psl exceeds the
//!          incumbent's PSL (the invariant rules out later hits)
//! delete:  slide successors with PSL > 0 back one slot, decrementing,
//!          until an empty slot or a PSL-0 entry
//! ```
//!
//! Each distinct key occupies one bucket; a bucket carries the ids of
//! every document with that key as an immutable `Arc` slice replaced
//! wholesale on mutation, so readers that captured a slice keep a
//! consistent pre-mutation view.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use kagura_core::metrics::Histogram;
use kagura_core::value::{key_hash, Value};
use kagura_core::{DocumentId, Error, Result};

/// Rehash when `(distinct + 1) / capacity` would exceed this.
const MAX_LOAD_NUM: usize = 3;
const MAX_LOAD_DEN: usize = 4;

/// One occupied slot: a distinct key, its stored 32-bit hash, its probe
/// sequence length, and the ids carrying that key.
#[derive(Clone)]
struct Bucket {
    bytes: Box<[u8]>,
    key: Value,
    hash: u32,
    psl: u32,
    ids: Arc<[DocumentId]>,
}

struct Table {
    buckets: Vec<Option<Bucket>>,
    /// Occupied buckets (distinct keys).
    distinct: usize,
    /// Total (key, id) pairs.
    entries: usize,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: (0..capacity).map(|_| None).collect(),
            distinct: 0,
            entries: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    /// Locate the bucket index holding `bytes`, if present.
    fn find(&self, hash: u32, bytes: &[u8]) -> Option<usize> {
        let mask = self.mask();
        let mut idx = hash as usize & mask;
        let mut psl = 0u32;
        loop {
            match &self.buckets[idx] {
                None => return None,
                Some(b) => {
                    if psl > b.psl {
                        // No later slot can hold the key.
                        return None;
                    }
                    if b.hash == hash && &*b.bytes == bytes {
                        return Some(idx);
                    }
                }
            }
            idx = (idx + 1) & mask;
            psl += 1;
        }
    }

    /// Robin Hood placement of a key known to be absent.
    fn place(&mut self, mut suitor: Bucket) {
        let mask = self.mask();
        let mut idx = suitor.hash as usize & mask;
        suitor.psl = 0;
        loop {
            match &mut self.buckets[idx] {
                slot @ None => {
                    *slot = Some(suitor);
                    return;
                }
                Some(incumbent) => {
                    if suitor.psl > incumbent.psl {
                        std::mem::swap(incumbent, &mut suitor);
                    }
                }
            }
            idx = (idx + 1) & mask;
            suitor.psl += 1;
        }
    }

    /// Double the capacity, reinserting every bucket with its stored
    /// hash. Keys are never re-encoded or re-hashed.
    fn grow(&mut self) {
        let new_capacity = self.capacity() * 2;
        let old = std::mem::replace(
            &mut self.buckets,
            (0..new_capacity).map(|_| None).collect(),
        );
        for bucket in old.into_iter().flatten() {
            self.place(bucket);
        }
    }

    /// Vacate `idx` and restore the invariant by backward shifting.
    fn remove_at(&mut self, idx: usize) {
        let mask = self.mask();
        self.buckets[idx] = None;
        let mut hole = idx;
        loop {
            let next = (hole + 1) & mask;
            match &self.buckets[next] {
                Some(b) if b.psl > 0 => {
                    let mut moved = self.buckets[next].take().expect("occupied");
                    moved.psl -= 1;
                    self.buckets[hole] = Some(moved);
                    hole = next;
                }
                _ => break,
            }
        }
    }
}

/// Statistics for one hash table.
#[derive(Debug, Clone, Default)]
pub struct HashIndexStats {
    pub distinct_keys: usize,
    pub entries: usize,
    pub capacity: usize,
    pub load_factor: f64,
    pub max_psl: u32,
    pub lookups: u64,
}

/// Robin Hood equality index over one (collection, field) pair.
pub struct HashIndex {
    /// `collection.field`, for error messages and logs.
    label: String,
    unique: bool,
    table: RwLock<Table>,
    /// Bounded canonical-bytes → hash memo. Purely an optimization;
    /// never observable in results.
    hash_cache: Option<Mutex<LruCache<Box<[u8]>, u32>>>,
    lookups: AtomicU64,
}

impl HashIndex {
    pub fn new(label: impl Into<String>, unique: bool, capacity: usize, cache_entries: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(8);
        Self {
            label: label.into(),
            unique,
            table: RwLock::new(Table::with_capacity(capacity)),
            hash_cache: std::num::NonZeroUsize::new(cache_entries)
                .map(|n| Mutex::new(LruCache::new(n))),
            lookups: AtomicU64::new(0),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    fn hash_of(&self, bytes: &[u8]) -> u32 {
        if let Some(cache) = &self.hash_cache {
            let mut cache = cache.lock();
            if let Some(&h) = cache.get(bytes) {
                return h;
            }
            let h = key_hash(bytes);
            cache.put(bytes.into(), h);
            h
        } else {
            key_hash(bytes)
        }
    }

    /// Insert `(key, id)`. Appends to the id list of an existing key;
    /// fails with `DuplicateKey` when the index is unique and the key is
    /// already held by a different document.
    pub fn insert(&self, key: &Value, id: &DocumentId) -> Result<()> {
        let bytes = key.canonical_bytes();
        let hash = self.hash_of(&bytes);
        let mut table = self.table.write();

        if let Some(idx) = table.find(hash, &bytes) {
            let bucket = table.buckets[idx].as_ref().expect("found bucket");
            if bucket.ids.iter().any(|existing| existing == id) {
                return Ok(());
            }
            if self.unique {
                return Err(Error::DuplicateKey {
                    field: self.label.clone(),
                    value: key.to_string(),
                });
            }
            let mut ids: Vec<DocumentId> = bucket.ids.to_vec();
            ids.push(id.clone());
            table.buckets[idx].as_mut().expect("found bucket").ids = ids.into();
            table.entries += 1;
            return Ok(());
        }

        if (table.distinct + 1) * MAX_LOAD_DEN > table.capacity() * MAX_LOAD_NUM {
            table.grow();
        }
        table.place(Bucket {
            bytes: bytes.into_boxed_slice(),
            key: key.clone(),
            hash,
            psl: 0,
            ids: Arc::from(vec![id.clone()]),
        });
        table.distinct += 1;
        table.entries += 1;
        Ok(())
    }

    /// Remove `(key, id)`. Returns whether the pair was present. A key
    /// whose last id is removed vacates its bucket with a backward shift.
    pub fn remove(&self, key: &Value, id: &DocumentId) -> bool {
        let bytes = key.canonical_bytes();
        let hash = self.hash_of(&bytes);
        let mut table = self.table.write();

        let Some(idx) = table.find(hash, &bytes) else {
            return false;
        };
        let bucket = table.buckets[idx].as_ref().expect("found bucket");
        let Some(pos) = bucket.ids.iter().position(|existing| existing == id) else {
            return false;
        };
        if bucket.ids.len() > 1 {
            let mut ids: Vec<DocumentId> = bucket.ids.to_vec();
            ids.remove(pos);
            table.buckets[idx].as_mut().expect("found bucket").ids = ids.into();
        } else {
            table.remove_at(idx);
            table.distinct -= 1;
        }
        table.entries -= 1;
        true
    }

    /// Ids holding `key`, as a consistent snapshot.
    pub fn get(&self, key: &Value) -> Option<Arc<[DocumentId]>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let bytes = key.canonical_bytes();
        let hash = self.hash_of(&bytes);
        let table = self.table.read();
        table
            .find(hash, &bytes)
            .map(|idx| table.buckets[idx].as_ref().expect("found bucket").ids.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        let bytes = key.canonical_bytes();
        let hash = self.hash_of(&bytes);
        self.table.read().find(hash, &bytes).is_some()
    }

    /// Total (key, id) pairs.
    pub fn len(&self) -> usize {
        self.table.read().entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn distinct_keys(&self) -> usize {
        self.table.read().distinct
    }

    /// Visit every (key, ids) pair. No ordering guarantee.
    pub fn for_each(&self, mut f: impl FnMut(&Value, &[DocumentId])) {
        let table = self.table.read();
        for bucket in table.buckets.iter().flatten() {
            f(&bucket.key, &bucket.ids);
        }
    }

    /// Record every occupied bucket's PSL into `histogram`.
    pub fn record_probe_lengths(&self, histogram: &Histogram) {
        let table = self.table.read();
        for bucket in table.buckets.iter().flatten() {
            histogram.record(u64::from(bucket.psl));
        }
    }

    pub fn stats(&self) -> HashIndexStats {
        let table = self.table.read();
        let max_psl = table
            .buckets
            .iter()
            .flatten()
            .map(|b| b.psl)
            .max()
            .unwrap_or(0);
        HashIndexStats {
            distinct_keys: table.distinct,
            entries: table.entries,
            capacity: table.capacity(),
            load_factor: table.distinct as f64 / table.capacity() as f64,
            max_psl,
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }

    /// Rough footprint of the table itself, for `stats()` reporting.
    pub fn estimated_size(&self) -> usize {
        let table = self.table.read();
        let slots = table.capacity() * std::mem::size_of::<Option<Bucket>>();
        let payload: usize = table
            .buckets
            .iter()
            .flatten()
            .map(|b| b.bytes.len() + b.ids.iter().map(|id| id.0.len() + 24).sum::<usize>())
            .sum();
        slots + payload
    }

    /// Verify the Robin Hood invariants over every occupied bucket:
    /// correct PSL arithmetic and no hole between any entry and its ideal
    /// bucket. Returns a description of the first violation.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let table = self.table.read();
        let capacity = table.capacity();
        let mask = table.mask();
        let mut distinct = 0;
        let mut entries = 0;
        for (idx, slot) in table.buckets.iter().enumerate() {
            let Some(bucket) = slot else { continue };
            distinct += 1;
            entries += bucket.ids.len();
            if bucket.ids.is_empty() {
                return Err(format!("bucket {idx} holds a key with no ids"));
            }
            let ideal = bucket.hash as usize & mask;
            let expected_psl = ((idx + capacity) - ideal) & mask;
            if expected_psl != bucket.psl as usize {
                return Err(format!(
                    "bucket {idx}: stored psl {} but ideal bucket {ideal} implies {expected_psl}",
                    bucket.psl
                ));
            }
            if bucket.psl > 0 && table.buckets[(idx + capacity - 1) & mask].is_none() {
                return Err(format!(
                    "bucket {idx}: hole immediately before an entry with psl {}",
                    bucket.psl
                ));
            }
        }
        if distinct != table.distinct {
            return Err(format!(
                "distinct count drift: counted {distinct}, tracked {}",
                table.distinct
            ));
        }
        if entries != table.entries {
            return Err(format!(
                "entry count drift: counted {entries}, tracked {}",
                table.entries
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> DocumentId {
        DocumentId(format!("doc{n}"))
    }

    fn index() -> HashIndex {
        HashIndex::new("test.field", false, 16, 64)
    }

    #[test]
    fn insert_get_remove() {
        let idx = index();
        idx.insert(&Value::from("alpha"), &id(1)).unwrap();
        idx.insert(&Value::from("alpha"), &id(2)).unwrap();
        idx.insert(&Value::from("beta"), &id(3)).unwrap();

        let ids = idx.get(&Value::from("alpha")).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.distinct_keys(), 2);

        assert!(idx.remove(&Value::from("alpha"), &id(1)));
        assert_eq!(idx.get(&Value::from("alpha")).unwrap().len(), 1);
        assert!(idx.remove(&Value::from("alpha"), &id(2)));
        assert!(idx.get(&Value::from("alpha")).is_none());
        idx.check_invariants().unwrap();
    }

    #[test]
    fn reinsert_same_pair_is_idempotent() {
        let idx = index();
        idx.insert(&Value::from("k"), &id(1)).unwrap();
        idx.insert(&Value::from("k"), &id(1)).unwrap();
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn unique_violation() {
        let idx = HashIndex::new("test.u", true, 16, 0);
        idx.insert(&Value::from("a"), &id(1)).unwrap();
        let err = idx.insert(&Value::from("a"), &id(2)).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_KEY");
        // Same document re-applying the same key is not a violation.
        idx.insert(&Value::from("a"), &id(1)).unwrap();
    }

    #[test]
    fn rehash_boundary_at_three_quarters() {
        let idx = index();
        // Capacity 16: twelve distinct keys sit exactly at 0.75.
        for n in 0..12 {
            idx.insert(&Value::Int(n), &id(n as usize)).unwrap();
        }
        assert_eq!(idx.stats().capacity, 16);
        // The thirteenth pushes past 0.75 and doubles the table first.
        idx.insert(&Value::Int(12), &id(12)).unwrap();
        assert_eq!(idx.stats().capacity, 32);
        idx.check_invariants().unwrap();
        for n in 0..13 {
            assert!(idx.get(&Value::Int(n)).is_some(), "key {n} lost in rehash");
        }
    }

    #[test]
    fn delete_restores_pristine_layout() {
        // Insert k then delete k must leave the table bucket-for-bucket
        // as if k was never inserted.
        let reference = index();
        let churned = index();
        for n in 0..10 {
            reference.insert(&Value::Int(n), &id(n as usize)).unwrap();
            churned.insert(&Value::Int(n), &id(n as usize)).unwrap();
        }
        churned.insert(&Value::from("transient"), &id(999)).unwrap();
        assert!(churned.remove(&Value::from("transient"), &id(999)));

        let mut reference_pairs = Vec::new();
        reference.for_each(|k, ids| reference_pairs.push((k.clone(), ids.to_vec())));
        let mut churned_pairs = Vec::new();
        churned.for_each(|k, ids| churned_pairs.push((k.clone(), ids.to_vec())));
        assert_eq!(reference_pairs.len(), churned_pairs.len());
        // for_each walks buckets in slot order, so equal layouts produce
        // equal sequences.
        assert_eq!(reference_pairs, churned_pairs);
        churned.check_invariants().unwrap();
    }

    #[test]
    fn backward_shift_under_churn() {
        let idx = index();
        for n in 0..2000 {
            idx.insert(&Value::String(format!("k{n}")), &id(n)).unwrap();
        }
        for n in (0..2000).step_by(2) {
            assert!(idx.remove(&Value::String(format!("k{n}")), &id(n)));
        }
        idx.check_invariants().unwrap();
        for n in 0..2000 {
            let hit = idx.get(&Value::String(format!("k{n}")));
            if n % 2 == 0 {
                assert!(hit.is_none(), "deleted key k{n} still present");
            } else {
                assert!(hit.is_some(), "surviving key k{n} lost");
            }
        }
    }

    #[test]
    fn hash_cache_is_unobservable() {
        let cached = HashIndex::new("t.c", false, 16, 512);
        let uncached = HashIndex::new("t.u", false, 16, 0);
        for n in 0..100 {
            let key = Value::Int(n % 7);
            cached.insert(&key, &id(n as usize)).unwrap();
            uncached.insert(&key, &id(n as usize)).unwrap();
        }
        for n in 0..7 {
            assert_eq!(
                cached.get(&Value::Int(n)).map(|ids| ids.len()),
                uncached.get(&Value::Int(n)).map(|ids| ids.len())
            );
        }
    }
}
