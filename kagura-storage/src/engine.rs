//! # Database Engine
//!
//! The facade embedding applications talk to. Coordinates the collection
//! store, the index manager, the query engine, the query-result cache
//! and the snapshot collaborator.
//!
//! ## Mutation path
//!
//! ```text
//! insert:  schema ──► memory ceiling ──► storage put ──► index apply
//!                                            │               │ failure
//!                                            ◄───── rollback ┘
//! ```
//!
//! A failed insert leaves no partial entries anywhere: the memory
//! reservation is returned and the stored document removed before the
//! error surfaces. Updates and deletes follow the same per-document
//! discipline; an update touching several documents is not atomic across
//! them.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, warn};

use kagura_core::config::DatabaseConfig;
use kagura_core::document::{Document, DocumentId};
use kagura_core::metrics::{Histogram, HistogramStats, Metrics, MetricsSnapshot};
use kagura_core::value::Value;
use kagura_core::{Error, Result};
use kagura_index::{BundleStats, IndexDescriptor, IndexManager, IndexOptions};
use kagura_query::executor::project_fields;
use kagura_query::{
    AccessPath, Filter, QueryCache, QueryCacheStats, QueryExecutor, QueryOptions,
};

use crate::collection::CollectionStats;
use crate::schema::Schema;
use crate::snapshot::{CollectionSnapshot, SnapshotData, SnapshotManager};
use crate::store::DocumentStore;

/// Incremental memory accounting against an optional ceiling.
struct MemoryTracker {
    used: AtomicUsize,
    limit: Option<usize>,
}

impl MemoryTracker {
    fn new(limit: Option<usize>) -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit,
        }
    }

    /// Reserve `bytes`, failing before any downstream mutation when the
    /// ceiling would be exceeded.
    fn reserve(&self, bytes: usize) -> Result<()> {
        let prev = self.used.fetch_add(bytes, Ordering::SeqCst);
        if let Some(limit) = self.limit {
            if prev + bytes > limit {
                self.used.fetch_sub(bytes, Ordering::SeqCst);
                return Err(Error::OutOfMemory {
                    requested: bytes,
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Account without enforcement; used when reloading a snapshot.
    fn account(&self, bytes: usize) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes.min(self.used.load(Ordering::SeqCst)), Ordering::SeqCst);
    }

    fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }
}

/// Aggregate observability snapshot returned by [`Database::stats`].
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub collections: Vec<CollectionStats>,
    pub memory_usage: usize,
    pub memory_limit: Option<usize>,
    pub indexes: Vec<BundleStats>,
    pub probe_lengths: HistogramStats,
    pub query_cache: QueryCacheStats,
    pub counters: MetricsSnapshot,
}

/// An embeddable, in-process document store.
pub struct Database {
    config: DatabaseConfig,
    store: DocumentStore,
    indexes: IndexManager,
    executor: QueryExecutor,
    cache: QueryCache,
    metrics: Metrics,
    memory: MemoryTracker,
    snapshots: Option<SnapshotManager>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Create an empty store. Any snapshot on disk is ignored; use
    /// [`Database::open`] to load one.
    pub fn new(config: DatabaseConfig) -> Self {
        let snapshots = SnapshotManager::from_config(&config.snapshot);
        Self {
            store: DocumentStore::new(),
            indexes: IndexManager::new(config.index.clone()),
            executor: QueryExecutor::new(),
            cache: QueryCache::new(config.query.cache_entries),
            metrics: Metrics::new(),
            memory: MemoryTracker::new(config.storage.max_memory_bytes),
            snapshots,
            config,
        }
    }

    /// Open a store, restoring the snapshot blob when one exists.
    /// Documents are reloaded verbatim; every index is rebuilt by
    /// replaying the mutation stream in insert form.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let db = Self::new(config);
        let Some(snapshots) = &db.snapshots else {
            return Ok(db);
        };
        let Some(data) = snapshots.load()? else {
            return Ok(db);
        };

        for snapshot in &data.collections {
            let collection = db.store.create_collection(&snapshot.name, snapshot.schema.clone())?;
            for doc in &snapshot.documents {
                db.memory.account(doc.estimated_size());
                collection.put(doc.clone());
            }
        }
        for descriptor in &data.indexes {
            db.indexes.create(
                &descriptor.collection,
                &descriptor.field,
                IndexOptions {
                    kind: descriptor.kind,
                    unique: descriptor.unique,
                    shard_count: descriptor.shard_count,
                },
                std::iter::empty(),
            )?;
        }
        // Replay every document as an insert mutation to rebuild index
        // state from scratch.
        for snapshot in &data.collections {
            for doc in &snapshot.documents {
                db.indexes
                    .apply_mutation(&snapshot.name, &doc.id, None, Some(&doc.body))?;
            }
        }
        db.metrics.record_snapshot_load();
        db.metrics.update_memory(db.memory.used() as u64);
        info!(
            collections = data.collections.len(),
            indexes = data.indexes.len(),
            "store restored from snapshot"
        );
        Ok(db)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The index manager, exposed for tooling and tests that inspect
    /// access paths directly.
    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    // ── Collection lifecycle ────────────────────────────────────────

    pub fn create_collection(&self, name: &str, schema: Option<Schema>) -> Result<()> {
        self.store.create_collection(name, schema).map(|_| ())
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let collection = self.store.drop_collection(name)?;
        self.indexes.drop_collection(name);
        self.cache.purge_collection(name);
        self.memory.release(collection.size_bytes());
        self.metrics.update_memory(self.memory.used() as u64);
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.store.contains(name)
    }

    // ── Document CRUD ───────────────────────────────────────────────

    /// Insert a new document, returning its generated id.
    pub fn insert(&self, collection: &str, body: Value) -> Result<DocumentId> {
        let col = self.store.get(collection)?;
        if !matches!(body, Value::Object(_)) {
            return Err(Error::InvalidQuery {
                message: format!("document body must be an object, got {}", body.type_name()),
            });
        }
        if let Some(schema) = col.schema() {
            schema.validate(collection, &body)?;
        }

        let doc = Document::new(body);
        let size = doc.estimated_size();
        self.memory.reserve(size)?;

        col.put(doc.clone());
        if let Err(err) = self
            .indexes
            .apply_mutation(collection, &doc.id, None, Some(&doc.body))
        {
            // Unwind the storage write so the failed insert leaves no
            // trace anywhere.
            col.remove(&doc.id);
            self.memory.release(size);
            self.metrics.record_index_rollback();
            warn!(collection, document = %doc.id, error = %err, "insert rolled back");
            return Err(err);
        }

        col.bump_version();
        self.metrics.record_insert();
        self.metrics.update_memory(self.memory.used() as u64);
        Ok(doc.id)
    }

    /// Fetch one document by id.
    pub fn find_by_id(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.store.get(collection)?.get(id))
    }

    /// Run a filter with options; results pass through the query cache.
    pub fn find(
        &self,
        collection: &str,
        filter: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        let col = self.store.get(collection)?;
        let parsed = self.parse_filter(filter)?;
        let version = col.version();
        let fingerprint = Self::fingerprint(filter, options);

        if let Some(ids) = self.cache.get(collection, &fingerprint, version) {
            let mut docs: Vec<Document> = ids.iter().filter_map(|id| col.get(id)).collect();
            if let Some(projection) = &options.projection {
                for doc in &mut docs {
                    project_fields(doc, projection);
                }
            }
            self.metrics.record_query();
            return Ok(docs);
        }

        let (plan, docs) =
            self.executor
                .find_with_plan(col.as_ref(), &self.indexes, collection, &parsed, options)?;
        match plan.access {
            AccessPath::Equality { .. } => self.metrics.record_equality_lookup(),
            AccessPath::Range { .. } => self.metrics.record_range_scan(),
            AccessPath::FullScan => self.metrics.record_full_scan(),
        }
        self.metrics.record_query();
        self.cache.put(
            collection,
            &fingerprint,
            version,
            docs.iter().map(|d| d.id.clone()).collect(),
        );
        Ok(docs)
    }

    /// First match, if any.
    pub fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Document>> {
        let options = QueryOptions::default().limit(1);
        Ok(self.find(collection, filter, &options)?.into_iter().next())
    }

    /// Count matches without materializing results.
    pub fn count(&self, collection: &str, filter: &Value) -> Result<usize> {
        let col = self.store.get(collection)?;
        let parsed = self.parse_filter(filter)?;
        self.metrics.record_query();
        self.executor
            .count(col.as_ref(), &self.indexes, collection, &parsed)
    }

    /// Merge `patch` into every matching document's body; returns the
    /// number of documents updated. Whole-body merge: top-level patch
    /// fields replace or extend the body. Not atomic across matches.
    pub fn update(&self, collection: &str, filter: &Value, patch: &Value) -> Result<usize> {
        let col = self.store.get(collection)?;
        let parsed = self.parse_filter(filter)?;
        let Value::Object(patch_pairs) = patch else {
            return Err(Error::InvalidQuery {
                message: format!("update patch must be an object, got {}", patch.type_name()),
            });
        };

        let matched = self.executor.find(
            col.as_ref(),
            &self.indexes,
            collection,
            &parsed,
            &QueryOptions::default(),
        )?;

        let mut updated = 0usize;
        for doc in matched {
            let old_body = doc.body.clone();
            let mut new_body = old_body.clone();
            for (key, value) in patch_pairs {
                new_body.set(key, value.clone());
            }
            if new_body == old_body {
                // Idempotent update: the body is already in the target
                // state; nothing to write and nothing to re-index.
                updated += 1;
                continue;
            }
            if let Some(schema) = col.schema() {
                schema.validate(collection, &new_body)?;
            }

            let mut new_doc = doc.clone();
            new_doc.replace_body(new_body);
            let old_size = doc.estimated_size();
            let new_size = new_doc.estimated_size();
            if new_size > old_size {
                self.memory.reserve(new_size - old_size)?;
            }

            if let Err(err) =
                self.indexes
                    .apply_mutation(collection, &doc.id, Some(&old_body), Some(&new_doc.body))
            {
                if new_size > old_size {
                    self.memory.release(new_size - old_size);
                }
                self.metrics.record_index_rollback();
                return Err(err);
            }
            col.put(new_doc);
            if new_size < old_size {
                self.memory.release(old_size - new_size);
            }
            col.bump_version();
            updated += 1;
        }

        if updated > 0 {
            self.metrics.record_update(updated as u64);
            self.metrics.update_memory(self.memory.used() as u64);
        }
        Ok(updated)
    }

    /// Delete every matching document; returns how many went away.
    pub fn delete(&self, collection: &str, filter: &Value) -> Result<usize> {
        let col = self.store.get(collection)?;
        let parsed = self.parse_filter(filter)?;
        let matched = self.executor.find(
            col.as_ref(),
            &self.indexes,
            collection,
            &parsed,
            &QueryOptions::default(),
        )?;

        let mut deleted = 0usize;
        for doc in matched {
            let Some(removed) = col.remove(&doc.id) else {
                continue;
            };
            // Removals cannot conflict; the purge half never fails.
            self.indexes
                .apply_mutation(collection, &removed.id, Some(&removed.body), None)?;
            self.memory.release(removed.estimated_size());
            col.bump_version();
            deleted += 1;
        }

        if deleted > 0 {
            self.metrics.record_delete(deleted as u64);
            self.metrics.update_memory(self.memory.used() as u64);
            debug!(collection, deleted, "documents deleted");
        }
        Ok(deleted)
    }

    // ── Index lifecycle ─────────────────────────────────────────────

    /// Create an index on `collection.field`, building it from the
    /// documents already present.
    pub fn create_index(&self, collection: &str, field: &str, options: IndexOptions) -> Result<()> {
        let col = self.store.get(collection)?;
        let pairs = col.snapshot_pairs();
        self.indexes
            .create(collection, field, options, pairs.iter().map(|(i, b)| (i, b)))?;
        self.metrics.record_index_build();
        Ok(())
    }

    pub fn drop_index(&self, collection: &str, field: &str) -> Result<()> {
        self.store.get(collection)?;
        self.indexes.drop_index(collection, field)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDescriptor>> {
        self.store.get(collection)?;
        Ok(self.indexes.list(collection))
    }

    // ── Observability ───────────────────────────────────────────────

    pub fn stats(&self) -> DatabaseStats {
        let probe_lengths = Histogram::probe_lengths();
        self.indexes.record_probe_lengths(&probe_lengths);
        DatabaseStats {
            collections: self.store.all().iter().map(|c| c.stats()).collect(),
            memory_usage: self.memory.used(),
            memory_limit: self.config.storage.max_memory_bytes,
            indexes: self.indexes.stats(None),
            probe_lengths: probe_lengths.stats(),
            query_cache: self.cache.stats(),
            counters: self.metrics.snapshot(),
        }
    }

    /// Audit every index structure; exposed for tests and tooling.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        self.indexes.check_invariants()
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Write the snapshot blob now. A no-op when no path is configured.
    pub fn save(&self) -> Result<()> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(());
        };
        let mut data = SnapshotData::default();
        for collection in self.store.all() {
            data.indexes.extend(self.indexes.list(collection.name()));
            data.collections.push(CollectionSnapshot {
                name: collection.name().to_string(),
                schema: collection.schema().cloned(),
                documents: collection.snapshot_documents(),
            });
        }
        snapshots.save(&data)?;
        self.metrics.record_snapshot_save();
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn parse_filter(&self, filter: &Value) -> Result<Filter> {
        Filter::parse(filter).inspect_err(|_| self.metrics.record_query_error())
    }

    /// Canonical cache key text for a (filter, options) pair.
    fn fingerprint(filter: &Value, options: &QueryOptions) -> String {
        let filter_json = serde_json::to_string(filter).unwrap_or_default();
        let options_json = serde_json::to_string(options).unwrap_or_default();
        format!("{filter_json}|{options_json}")
    }
}
