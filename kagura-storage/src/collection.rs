//! # Collection Storage
//!
//! One collection: a concurrent skip-list map from document id to
//! document. Generated ids carry a monotonic millisecond prefix, so the
//! map's id order is a stable, roughly-insertion-ordered iteration,
//! which is the property full scans rely on.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_skiplist::SkipMap;

use kagura_core::document::{Document, DocumentId};
use kagura_query::DocumentSource;

use crate::schema::Schema;

pub struct Collection {
    name: String,
    docs: SkipMap<DocumentId, Document>,
    size_bytes: AtomicUsize,
    /// Bumped on every mutation; query-cache entries carry the stamp
    /// they were computed at.
    version: AtomicU64,
    schema: Option<Schema>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Per-collection statistics.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub size_bytes: usize,
    pub version: u64,
}

impl Collection {
    pub fn new(name: impl Into<String>, schema: Option<Schema>) -> Self {
        Self {
            name: name.into(),
            docs: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
            version: AtomicU64::new(0),
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Insert or replace a document, returning the displaced one.
    pub fn put(&self, doc: Document) -> Option<Document> {
        let size = doc.estimated_size();
        let id = doc.id.clone();
        let old = self.docs.remove(&id).map(|e| e.value().clone());
        if let Some(old_doc) = &old {
            self.size_bytes
                .fetch_sub(old_doc.estimated_size(), Ordering::Relaxed);
        }
        self.docs.insert(id, doc);
        self.size_bytes.fetch_add(size, Ordering::Relaxed);
        old
    }

    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.docs.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &DocumentId) -> Option<Document> {
        let removed = self.docs.remove(id).map(|e| e.value().clone());
        if let Some(doc) = &removed {
            self.size_bytes
                .fetch_sub(doc.estimated_size(), Ordering::Relaxed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Owned (id, body) pairs in id order, used for index builds.
    pub fn snapshot_pairs(&self) -> Vec<(DocumentId, kagura_core::Value)> {
        self.docs
            .iter()
            .map(|e| (e.key().clone(), e.value().body.clone()))
            .collect()
    }

    /// Owned documents in id order, used by the snapshot writer.
    pub fn snapshot_documents(&self) -> Vec<Document> {
        self.docs.iter().map(|e| e.value().clone()).collect()
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            name: self.name.clone(),
            documents: self.docs.len(),
            size_bytes: self.size_bytes(),
            version: self.version(),
        }
    }
}

impl DocumentSource for Collection {
    fn get(&self, id: &DocumentId) -> Option<Document> {
        Collection::get(self, id)
    }

    fn scan(&self) -> Box<dyn Iterator<Item = Document> + '_> {
        Box::new(self.docs.iter().map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kagura_core::Value;

    fn doc(n: usize) -> Document {
        let mut d = Document::new(Value::object(vec![("n", Value::Int(n as i64))]));
        d.id = DocumentId(format!("{n:05}_aaaaaaaaa"));
        d
    }

    #[test]
    fn iteration_is_id_ordered() {
        let col = Collection::new("c", None);
        for n in [5, 1, 9, 3, 7] {
            col.put(doc(n));
        }
        let order: Vec<DocumentId> = col.scan().map(|d| d.id).collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(col.len(), 5);
    }

    #[test]
    fn size_accounting_tracks_put_replace_remove() {
        let col = Collection::new("c", None);
        col.put(doc(1));
        let after_one = col.size_bytes();
        assert!(after_one > 0);

        // Replacing the same id must not double-count.
        col.put(doc(1));
        assert_eq!(col.size_bytes(), after_one);

        col.remove(&doc(1).id);
        assert_eq!(col.size_bytes(), 0);
        assert!(col.is_empty());
    }

    #[test]
    fn version_stamps_are_monotonic() {
        let col = Collection::new("c", None);
        let v0 = col.version();
        col.bump_version();
        col.bump_version();
        assert_eq!(col.version(), v0 + 2);
    }
}
