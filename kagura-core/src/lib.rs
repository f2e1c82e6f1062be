//! # KaguraDB Core
//!
//! This crate provides the fundamental building blocks for KaguraDB:
//! - Document and value model
//! - Error types
//! - Configuration
//! - Metrics
//! - Snapshot sealing primitives
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   kagura-core                   │
//! ├─────────────────────────────────────────────────┤
//! │  • value      - JSON-like values, total order,  │
//! │                 canonical encoding, mixers      │
//! │  • document   - documents and identifiers       │
//! │  • error      - error handling                  │
//! │  • config     - component configuration         │
//! │  • metrics    - counters & histograms           │
//! │  • crypto     - snapshot sealing                │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod metrics;
pub mod value;

// Re-export commonly used types
pub use config::{DatabaseConfig, IndexConfig, QueryConfig, SnapshotConfig, StorageConfig};
pub use document::{Document, DocumentId};
pub use error::{Error, Result};
pub use value::{key_hash, shard_hash, Value};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
