//! # Configuration Management
//!
//! Handles all configuration for KaguraDB components.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub storage: StorageConfig,
    pub index: IndexConfig,
    pub query: QueryConfig,
    pub snapshot: SnapshotConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            index: IndexConfig::default(),
            query: QueryConfig::default(),
            snapshot: SnapshotConfig::default(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Ceiling on the summed estimated size of all documents. `None`
    /// disables the check.
    pub max_memory_bytes: Option<usize>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: None,
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// B+ tree branching factor. Valid range 16..=128.
    pub btree_order: usize,
    /// Shard count used when an index is created without an explicit one.
    /// Must be a power of two.
    pub default_shard_count: usize,
    /// Initial bucket count of a hash index. Must be a power of two.
    pub hash_initial_capacity: usize,
    /// Entries in the bounded key-hash LRU. 0 disables the cache.
    pub hash_cache_entries: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            btree_order: 32,
            default_shard_count: 16,
            hash_initial_capacity: 16,
            hash_cache_entries: 1024,
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Entries in the query-result cache. 0 disables caching.
    pub cache_entries: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { cache_entries: 256 }
    }
}

/// Snapshot persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Blob location. `None` keeps the store purely in memory.
    pub path: Option<PathBuf>,
    /// Passphrase for AES-256-GCM sealing. `None` writes plaintext.
    pub passphrase: Option<String>,
    /// Rotated backups kept next to the blob.
    pub max_backups: usize,
    /// Suggested interval between periodic saves; the embedding
    /// application drives the timer.
    pub save_interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            passphrase: None,
            max_backups: 3,
            save_interval: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = DatabaseConfig::default();
        assert!(config.index.btree_order >= 16 && config.index.btree_order <= 128);
        assert!(config.index.default_shard_count.is_power_of_two());
        assert!(config.index.hash_initial_capacity.is_power_of_two());
        assert!(config.storage.max_memory_bytes.is_none());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = DatabaseConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: DatabaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.index.btree_order, config.index.btree_order);
        assert_eq!(back.snapshot.max_backups, config.snapshot.max_backups);
    }
}
