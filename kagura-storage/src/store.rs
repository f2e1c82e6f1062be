//! Collection registry: the storage collaborator boundary. Maps a
//! collection name to its live [`Collection`].

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use kagura_core::{Error, Result};

use crate::collection::Collection;
use crate::schema::Schema;

#[derive(Default)]
pub struct DocumentStore {
    collections: RwLock<FxHashMap<String, Arc<Collection>>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_collection(&self, name: &str, schema: Option<Schema>) -> Result<Arc<Collection>> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(Error::DuplicateCollection {
                name: name.to_string(),
            });
        }
        let collection = Arc::new(Collection::new(name, schema));
        collections.insert(name.to_string(), collection.clone());
        debug!(collection = name, "collection created");
        Ok(collection)
    }

    pub fn drop_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .write()
            .remove(name)
            .inspect(|_| debug!(collection = name, "collection dropped"))
            .ok_or_else(|| Error::UnknownCollection {
                name: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCollection {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// All live collections, name-sorted for deterministic output.
    pub fn all(&self) -> Vec<Arc<Collection>> {
        let mut list: Vec<Arc<Collection>> = self.collections.read().values().cloned().collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle() {
        let store = DocumentStore::new();
        store.create_collection("users", None).unwrap();
        assert!(store.contains("users"));

        let err = store.create_collection("users", None).unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_COLLECTION");

        store.drop_collection("users").unwrap();
        assert!(!store.contains("users"));
        assert_eq!(
            store.drop_collection("users").unwrap_err().error_code(),
            "UNKNOWN_COLLECTION"
        );
        assert_eq!(
            store.get("users").unwrap_err().error_code(),
            "UNKNOWN_COLLECTION"
        );
    }
}
