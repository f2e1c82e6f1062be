//! # Index Manager
//!
//! Owns every index bundle in the store, keyed by (collection, field).
//! A bundle carries the index kinds requested at creation: a Robin Hood
//! hash table (optionally sharded) for equality, a B+ tree for ordered
//! range scans, or both. The manager keeps them coherent across
//! document mutations.
//!
//! A mutation that touches several bundles applies them sequentially;
//! when a later bundle rejects the change (unique violation), every
//! half-applied bundle is rolled back before the error surfaces, so a
//! failed mutation leaves no trace in any index.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use kagura_core::config::IndexConfig;
use kagura_core::metrics::Histogram;
use kagura_core::value::Value;
use kagura_core::{DocumentId, Error, Result};

use crate::btree::{BTreeIndex, BTreeIndexStats};
use crate::hash::HashIndexStats;
use crate::hash::HashIndex;
use crate::sharded::ShardedHashIndex;

/// Which structures a bundle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    Equality,
    Ordered,
    Both,
}

impl IndexKind {
    pub fn has_equality(self) -> bool {
        matches!(self, IndexKind::Equality | IndexKind::Both)
    }

    pub fn has_ordered(self) -> bool {
        matches!(self, IndexKind::Ordered | IndexKind::Both)
    }
}

/// Capability a caller asks about before picking an access path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexCapability {
    Equality,
    Ordered,
}

/// Options accepted by `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexOptions {
    pub kind: IndexKind,
    pub unique: bool,
    /// 0 or 1 selects a single unsharded table; larger values must be a
    /// power of two.
    pub shard_count: usize,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            kind: IndexKind::Both,
            unique: false,
            shard_count: 1,
        }
    }
}

impl IndexOptions {
    pub fn equality() -> Self {
        Self {
            kind: IndexKind::Equality,
            ..Self::default()
        }
    }

    pub fn ordered() -> Self {
        Self {
            kind: IndexKind::Ordered,
            ..Self::default()
        }
    }

    pub fn both() -> Self {
        Self::default()
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn sharded(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }
}

/// Descriptor of a live bundle, also the shape persisted in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub collection: String,
    pub field: String,
    pub kind: IndexKind,
    pub unique: bool,
    pub shard_count: usize,
}

/// Equality side of a bundle: one table, or a fan-out of them.
enum EqualityIndex {
    Plain(HashIndex),
    Sharded(ShardedHashIndex),
}

impl EqualityIndex {
    fn insert(&self, value: &Value, id: &DocumentId) -> Result<()> {
        match self {
            EqualityIndex::Plain(h) => h.insert(value, id),
            EqualityIndex::Sharded(s) => s.insert(value, id),
        }
    }

    fn remove(&self, value: &Value, id: &DocumentId) -> bool {
        match self {
            EqualityIndex::Plain(h) => h.remove(value, id),
            EqualityIndex::Sharded(s) => s.remove(value, id),
        }
    }

    fn get(&self, value: &Value) -> Option<Arc<[DocumentId]>> {
        match self {
            EqualityIndex::Plain(h) => h.get(value),
            EqualityIndex::Sharded(s) => s.get(value),
        }
    }

    fn len(&self) -> usize {
        match self {
            EqualityIndex::Plain(h) => h.len(),
            EqualityIndex::Sharded(s) => s.len(),
        }
    }

    fn estimated_size(&self) -> usize {
        match self {
            EqualityIndex::Plain(h) => h.estimated_size(),
            EqualityIndex::Sharded(s) => s.estimated_size(),
        }
    }

    fn record_probe_lengths(&self, histogram: &Histogram) {
        match self {
            EqualityIndex::Plain(h) => h.record_probe_lengths(histogram),
            EqualityIndex::Sharded(s) => s.record_probe_lengths(histogram),
        }
    }

    fn balance_score(&self) -> Option<f64> {
        match self {
            EqualityIndex::Plain(_) => None,
            EqualityIndex::Sharded(s) => Some(s.stats().balance_score),
        }
    }

    fn hash_stats(&self) -> Vec<HashIndexStats> {
        match self {
            EqualityIndex::Plain(h) => vec![h.stats()],
            EqualityIndex::Sharded(s) => s.stats().shards,
        }
    }

    fn check_invariants(&self) -> std::result::Result<(), String> {
        match self {
            EqualityIndex::Plain(h) => h.check_invariants(),
            EqualityIndex::Sharded(s) => s.check_invariants(),
        }
    }
}

/// One (collection, field) bundle holding the requested index kinds.
pub struct IndexBundle {
    descriptor: IndexDescriptor,
    equality: Option<EqualityIndex>,
    ordered: Option<BTreeIndex>,
}

impl IndexBundle {
    fn new(descriptor: IndexDescriptor, config: &IndexConfig) -> Self {
        let label = format!("{}.{}", descriptor.collection, descriptor.field);
        let equality = descriptor.kind.has_equality().then(|| {
            if descriptor.shard_count > 1 {
                EqualityIndex::Sharded(ShardedHashIndex::new(
                    &label,
                    descriptor.unique,
                    descriptor.shard_count,
                    config.hash_initial_capacity,
                    config.hash_cache_entries,
                ))
            } else {
                EqualityIndex::Plain(HashIndex::new(
                    label.clone(),
                    descriptor.unique,
                    config.hash_initial_capacity,
                    config.hash_cache_entries,
                ))
            }
        });
        let ordered = descriptor
            .kind
            .has_ordered()
            .then(|| BTreeIndex::new(label, descriptor.unique, config.btree_order));
        Self {
            descriptor,
            equality,
            ordered,
        }
    }

    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    pub fn field(&self) -> &str {
        &self.descriptor.field
    }

    /// Add `(value, id)` to every structure in the bundle. If the
    /// ordered side rejects after the equality side applied, the
    /// equality half is undone before the error escapes.
    fn add(&self, value: &Value, id: &DocumentId) -> Result<()> {
        if let Some(equality) = &self.equality {
            equality.insert(value, id)?;
        }
        if let Some(ordered) = &self.ordered {
            if let Err(err) = ordered.insert(value, id) {
                if let Some(equality) = &self.equality {
                    equality.remove(value, id);
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn remove(&self, value: &Value, id: &DocumentId) {
        if let Some(equality) = &self.equality {
            equality.remove(value, id);
        }
        if let Some(ordered) = &self.ordered {
            ordered.remove(value, id);
        }
    }

    pub fn entry_count(&self) -> usize {
        if let Some(equality) = &self.equality {
            equality.len()
        } else if let Some(ordered) = &self.ordered {
            ordered.len()
        } else {
            0
        }
    }

    pub fn estimated_size(&self) -> usize {
        self.equality.as_ref().map_or(0, EqualityIndex::estimated_size)
            + self.ordered.as_ref().map_or(0, BTreeIndex::estimated_size)
    }

    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        if let Some(equality) = &self.equality {
            equality.check_invariants()?;
        }
        if let Some(ordered) = &self.ordered {
            ordered.check_invariants()?;
        }
        Ok(())
    }
}

/// Statistics for one bundle.
#[derive(Debug, Clone)]
pub struct BundleStats {
    pub descriptor: IndexDescriptor,
    pub entries: usize,
    pub size_bytes: usize,
    pub balance_score: Option<f64>,
    pub hash: Vec<HashIndexStats>,
    pub btree: Option<BTreeIndexStats>,
}

/// Owner of all bundles, keyed by collection then field.
pub struct IndexManager {
    bundles: RwLock<FxHashMap<String, Vec<Arc<IndexBundle>>>>,
    config: IndexConfig,
}

/// Undo record for the cross-bundle rollback of `apply_mutation`.
enum UndoOp {
    /// A removal that must be re-applied.
    ReAdd(Arc<IndexBundle>, Value),
    /// An addition that must be removed.
    RemoveAdded(Arc<IndexBundle>, Value),
}

impl IndexManager {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            bundles: RwLock::new(FxHashMap::default()),
            config,
        }
    }

    /// Create a bundle and build it from the documents already in the
    /// collection. A unique conflict during the build aborts the whole
    /// creation; no partial bundle is ever registered.
    pub fn create<'a>(
        &self,
        collection: &str,
        field: &str,
        options: IndexOptions,
        existing: impl Iterator<Item = (&'a DocumentId, &'a Value)>,
    ) -> Result<()> {
        if options.shard_count > 1 && !options.shard_count.is_power_of_two() {
            return Err(Error::Internal {
                message: format!("shard count {} is not a power of two", options.shard_count),
            });
        }
        if self.find(collection, field).is_some() {
            return Err(Error::DuplicateIndex {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }

        let descriptor = IndexDescriptor {
            collection: collection.to_string(),
            field: field.to_string(),
            kind: options.kind,
            unique: options.unique,
            shard_count: options.shard_count,
        };
        let bundle = IndexBundle::new(descriptor, &self.config);

        let mut built = 0usize;
        for (id, body) in existing {
            if let Some(value) = body.get(field) {
                bundle.add(value, id)?;
                built += 1;
            }
        }

        info!(collection, field, entries = built, "index created");
        self.bundles
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(Arc::new(bundle));
        Ok(())
    }

    /// Drop one bundle.
    pub fn drop_index(&self, collection: &str, field: &str) -> Result<()> {
        let mut bundles = self.bundles.write();
        let list = bundles.get_mut(collection).ok_or_else(|| Error::UnknownIndex {
            collection: collection.to_string(),
            field: field.to_string(),
        })?;
        let before = list.len();
        list.retain(|b| b.field() != field);
        if list.len() == before {
            return Err(Error::UnknownIndex {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }
        debug!(collection, field, "index dropped");
        Ok(())
    }

    /// Drop every bundle on a collection. Dropping the collection owns
    /// its bundles, so this never fails.
    pub fn drop_collection(&self, collection: &str) {
        if self.bundles.write().remove(collection).is_some() {
            debug!(collection, "collection indexes dropped");
        }
    }

    /// Descriptors of every bundle on a collection, in creation order.
    pub fn list(&self, collection: &str) -> Vec<IndexDescriptor> {
        self.bundles
            .read()
            .get(collection)
            .map(|list| list.iter().map(|b| b.descriptor().clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_index(&self, collection: &str, field: &str, capability: IndexCapability) -> bool {
        self.find(collection, field).is_some_and(|b| match capability {
            IndexCapability::Equality => b.equality.is_some(),
            IndexCapability::Ordered => b.ordered.is_some(),
        })
    }

    fn find(&self, collection: &str, field: &str) -> Option<Arc<IndexBundle>> {
        self.bundles
            .read()
            .get(collection)?
            .iter()
            .find(|b| b.field() == field)
            .cloned()
    }

    fn collection_bundles(&self, collection: &str) -> Vec<Arc<IndexBundle>> {
        self.bundles
            .read()
            .get(collection)
            .map(|list| list.to_vec())
            .unwrap_or_default()
    }

    /// Ids whose `field` equals `value`, if an equality-capable bundle
    /// exists.
    pub fn lookup_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Option<Vec<DocumentId>> {
        let bundle = self.find(collection, field)?;
        let equality = bundle.equality.as_ref()?;
        Some(
            equality
                .get(value)
                .map(|ids| ids.to_vec())
                .unwrap_or_default(),
        )
    }

    /// Ids whose `field` lies within the bounds, ascending by key, if an
    /// ordered-capable bundle exists.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_range(
        &self,
        collection: &str,
        field: &str,
        lo: Option<&Value>,
        hi: Option<&Value>,
        inclusive_lo: bool,
        inclusive_hi: bool,
    ) -> Option<Vec<DocumentId>> {
        let bundle = self.find(collection, field)?;
        let ordered = bundle.ordered.as_ref()?;
        Some(ordered.range(lo, hi, inclusive_lo, inclusive_hi))
    }

    /// Apply one document mutation to every bundle on the collection.
    ///
    /// - insert: `old_body` absent; add the new value where present
    /// - update: remove/add only the bundles whose field value changed
    /// - delete: `new_body` absent; remove the old value where present
    ///
    /// On failure every already-applied half is rolled back in reverse,
    /// leaving all bundles exactly as before the call.
    pub fn apply_mutation(
        &self,
        collection: &str,
        id: &DocumentId,
        old_body: Option<&Value>,
        new_body: Option<&Value>,
    ) -> Result<()> {
        let bundles = self.collection_bundles(collection);
        if bundles.is_empty() {
            return Ok(());
        }

        let mut undo: Vec<UndoOp> = Vec::new();
        for bundle in &bundles {
            let field = bundle.field();
            let old_value = old_body.and_then(|b| b.get(field));
            let new_value = new_body.and_then(|b| b.get(field));

            if let (Some(old), Some(new)) = (old_value, new_value) {
                if old == new {
                    continue;
                }
            }
            if old_value.is_none() && new_value.is_none() {
                continue;
            }

            if let Some(old) = old_value {
                bundle.remove(old, id);
                undo.push(UndoOp::ReAdd(bundle.clone(), old.clone()));
            }
            if let Some(new) = new_value {
                match bundle.add(new, id) {
                    Ok(()) => undo.push(UndoOp::RemoveAdded(bundle.clone(), new.clone())),
                    Err(err) => {
                        self.rollback(undo, id);
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    fn rollback(&self, undo: Vec<UndoOp>, id: &DocumentId) {
        debug!(document = %id, steps = undo.len(), "rolling back index mutation");
        for op in undo.into_iter().rev() {
            match op {
                // Restoring a value that was present before cannot
                // conflict, so the error path is unreachable in practice.
                UndoOp::ReAdd(bundle, value) => {
                    let _ = bundle.add(&value, id);
                }
                UndoOp::RemoveAdded(bundle, value) => {
                    bundle.remove(&value, id);
                }
            }
        }
    }

    /// Statistics for every bundle, optionally filtered by collection.
    pub fn stats(&self, collection: Option<&str>) -> Vec<BundleStats> {
        let bundles = self.bundles.read();
        let mut out = Vec::new();
        for (name, list) in bundles.iter() {
            if collection.is_some_and(|c| c != name) {
                continue;
            }
            for bundle in list {
                out.push(BundleStats {
                    descriptor: bundle.descriptor().clone(),
                    entries: bundle.entry_count(),
                    size_bytes: bundle.estimated_size(),
                    balance_score: bundle
                        .equality
                        .as_ref()
                        .and_then(EqualityIndex::balance_score),
                    hash: bundle
                        .equality
                        .as_ref()
                        .map(EqualityIndex::hash_stats)
                        .unwrap_or_default(),
                    btree: bundle.ordered.as_ref().map(BTreeIndex::stats),
                });
            }
        }
        out
    }

    /// Record probe lengths of every hash structure into `histogram`.
    pub fn record_probe_lengths(&self, histogram: &Histogram) {
        for list in self.bundles.read().values() {
            for bundle in list {
                if let Some(equality) = &bundle.equality {
                    equality.record_probe_lengths(histogram);
                }
            }
        }
    }

    /// Audit every bundle; used by tests and the snapshot loader.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        for (name, list) in self.bundles.read().iter() {
            for bundle in list {
                bundle
                    .check_invariants()
                    .map_err(|e| format!("{}.{}: {e}", name, bundle.field()))?;
            }
        }
        Ok(())
    }
}
