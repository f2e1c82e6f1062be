//! # Snapshot Persistence
//!
//! Periodic whole-store persistence to a single blob. The blob carries
//! every collection's documents and the index *definitions*, never
//! index state; indexes are rebuilt from the document scan at load time.
//!
//! ## Blob framing
//!
//! ```text
//! ┌───────┬─────────┬───────┬─────────────┬──────────────┬─────────┐
//! │ magic │ version │ flags │ payload len │   payload    │  crc32  │
//! │ 4 B   │ 1 B     │ 1 B   │ 8 B LE      │ (json/sealed)│ 4 B LE  │
//! └───────┴─────────┴───────┴─────────────┴──────────────┴─────────┘
//! ```
//!
//! With a passphrase configured the payload is sealed with AES-256-GCM;
//! the CRC32 covers the payload as written and catches plain corruption
//! before any decryption is attempted. Writes go to a temp file followed
//! by an atomic rename, with up to `max_backups` rotated predecessors.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kagura_core::config::SnapshotConfig;
use kagura_core::crypto;
use kagura_core::document::Document;
use kagura_core::{Error, Result};
use kagura_index::IndexDescriptor;

use crate::schema::Schema;

const MAGIC: &[u8; 4] = b"KGRA";
const FORMAT_VERSION: u8 = 1;
const FLAG_SEALED: u8 = 0b0000_0001;
const HEADER_LEN: usize = 4 + 1 + 1 + 8;

/// One collection as persisted.
#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    pub schema: Option<Schema>,
    pub documents: Vec<Document>,
}

/// The whole-store snapshot payload.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub collections: Vec<CollectionSnapshot>,
    pub indexes: Vec<IndexDescriptor>,
}

/// Writer/reader for the snapshot blob.
pub struct SnapshotManager {
    path: PathBuf,
    key: Option<[u8; 32]>,
    max_backups: usize,
}

impl SnapshotManager {
    /// Build from configuration; `None` when no path is configured (the
    /// store stays purely in memory).
    pub fn from_config(config: &SnapshotConfig) -> Option<Self> {
        let path = config.path.clone()?;
        let key = config.passphrase.as_deref().map(crypto::derive_key);
        if let Some(key) = &key {
            debug!(
                fingerprint = %crypto::key_fingerprint(key),
                "snapshot sealing enabled"
            );
        }
        Some(Self {
            path,
            key,
            max_backups: config.max_backups,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize, frame, optionally seal, and atomically publish the
    /// blob, rotating prior generations.
    pub fn save(&self, data: &SnapshotData) -> Result<()> {
        let json = serde_json::to_vec(data).map_err(|e| Error::Snapshot {
            message: format!("failed to serialize snapshot: {e}"),
        })?;
        let payload = match &self.key {
            Some(key) => crypto::seal(key, &json)?,
            None => json,
        };

        let mut blob = Vec::with_capacity(HEADER_LEN + payload.len() + 4);
        blob.extend_from_slice(MAGIC);
        blob.push(FORMAT_VERSION);
        blob.push(if self.key.is_some() { FLAG_SEALED } else { 0 });
        blob.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        blob.extend_from_slice(&payload);
        blob.extend_from_slice(&crypto::checksum(&payload).to_le_bytes());

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &blob)?;
        self.rotate_backups()?;
        fs::rename(&tmp, &self.path)?;

        info!(
            path = %self.path.display(),
            bytes = blob.len(),
            collections = data.collections.len(),
            sealed = self.key.is_some(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Read and verify the blob. `Ok(None)` when no snapshot exists yet.
    pub fn load(&self) -> Result<Option<SnapshotData>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let blob = fs::read(&self.path)?;
        if blob.len() < HEADER_LEN + 4 {
            return Err(Error::Corruption {
                details: "snapshot blob truncated before header".to_string(),
            });
        }
        if &blob[..4] != MAGIC {
            return Err(Error::Corruption {
                details: "bad snapshot magic".to_string(),
            });
        }
        if blob[4] != FORMAT_VERSION {
            return Err(Error::Corruption {
                details: format!("unsupported snapshot version {}", blob[4]),
            });
        }
        let sealed = blob[5] & FLAG_SEALED != 0;
        let payload_len = u64::from_le_bytes(blob[6..14].try_into().expect("length checked")) as usize;
        if blob.len() != HEADER_LEN + payload_len + 4 {
            return Err(Error::Corruption {
                details: "snapshot length does not match header".to_string(),
            });
        }
        let payload = &blob[HEADER_LEN..HEADER_LEN + payload_len];
        let stored_crc = u32::from_le_bytes(
            blob[HEADER_LEN + payload_len..].try_into().expect("length checked"),
        );
        if crypto::checksum(payload) != stored_crc {
            return Err(Error::Corruption {
                details: "snapshot checksum mismatch".to_string(),
            });
        }

        let json = match (sealed, &self.key) {
            (true, Some(key)) => crypto::open(key, payload)?,
            (true, None) => {
                return Err(Error::Snapshot {
                    message: "snapshot is sealed but no passphrase is configured".to_string(),
                })
            }
            (false, _) => payload.to_vec(),
        };
        let data: SnapshotData = serde_json::from_slice(&json).map_err(|e| Error::Corruption {
            details: format!("snapshot payload does not parse: {e}"),
        })?;
        debug!(
            path = %self.path.display(),
            collections = data.collections.len(),
            "snapshot loaded"
        );
        Ok(Some(data))
    }

    fn backup_path(&self, generation: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{generation}"));
        PathBuf::from(name)
    }

    /// Shift existing generations one slot down, dropping the oldest.
    fn rotate_backups(&self) -> Result<()> {
        if !self.path.exists() || self.max_backups == 0 {
            return Ok(());
        }
        let oldest = self.backup_path(self.max_backups);
        if oldest.exists() {
            if let Err(e) = fs::remove_file(&oldest) {
                warn!(path = %oldest.display(), error = %e, "failed to drop oldest backup");
            }
        }
        for generation in (1..self.max_backups).rev() {
            let from = self.backup_path(generation);
            if from.exists() {
                fs::rename(&from, self.backup_path(generation + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kagura_core::Value;
    use std::time::Duration;

    fn config(dir: &Path, passphrase: Option<&str>) -> SnapshotConfig {
        SnapshotConfig {
            path: Some(dir.join("store.kagura")),
            passphrase: passphrase.map(String::from),
            max_backups: 2,
            save_interval: Duration::from_secs(60),
        }
    }

    fn sample() -> SnapshotData {
        SnapshotData {
            collections: vec![CollectionSnapshot {
                name: "c".to_string(),
                schema: None,
                documents: vec![Document::new(Value::object(vec![("k", Value::Int(1))]))],
            }],
            indexes: Vec::new(),
        }
    }

    #[test]
    fn round_trip_plain() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::from_config(&config(dir.path(), None)).unwrap();
        assert!(manager.load().unwrap().is_none());
        manager.save(&sample()).unwrap();
        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.collections.len(), 1);
        assert_eq!(loaded.collections[0].documents.len(), 1);
    }

    #[test]
    fn round_trip_sealed_and_wrong_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::from_config(&config(dir.path(), Some("p1"))).unwrap();
        manager.save(&sample()).unwrap();
        assert!(manager.load().unwrap().is_some());

        let wrong = SnapshotManager::from_config(&config(dir.path(), Some("p2"))).unwrap();
        assert_eq!(wrong.load().unwrap_err().error_code(), "CORRUPTION");

        let missing = SnapshotManager::from_config(&config(dir.path(), None)).unwrap();
        assert_eq!(missing.load().unwrap_err().error_code(), "SNAPSHOT_ERROR");
    }

    #[test]
    fn corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::from_config(&config(dir.path(), None)).unwrap();
        manager.save(&sample()).unwrap();

        let path = manager.path().to_path_buf();
        let mut blob = fs::read(&path).unwrap();
        let mid = blob.len() / 2;
        blob[mid] ^= 0xff;
        fs::write(&path, blob).unwrap();

        assert_eq!(manager.load().unwrap_err().error_code(), "CORRUPTION");
    }

    #[test]
    fn backups_rotate_with_bounded_depth() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::from_config(&config(dir.path(), None)).unwrap();
        for _ in 0..4 {
            manager.save(&sample()).unwrap();
        }
        assert!(manager.path().exists());
        assert!(manager.backup_path(1).exists());
        assert!(manager.backup_path(2).exists());
        assert!(!manager.backup_path(3).exists());
    }
}
