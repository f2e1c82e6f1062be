//! # KaguraDB Storage & Engine
//!
//! Collection storage, the engine facade, and the snapshot persistence
//! collaborator.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Database                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Write path:                                                 │
//! │  body ──► schema ──► memory ceiling ──► collection map       │
//! │                                             │                │
//! │                                             ▼                │
//! │                                       index manager          │
//! │                                      (rollback on fail)      │
//! │                                                              │
//! │  Read path:                                                  │
//! │  filter ──► query cache ──► planner ──► executor             │
//! │                                                              │
//! │  Persistence:                                                │
//! │  collections + index defs ──► framed blob (CRC32, AES-GCM)   │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod collection;
pub mod engine;
pub mod schema;
pub mod snapshot;
pub mod store;

pub use collection::{Collection, CollectionStats};
pub use engine::{Database, DatabaseStats};
pub use schema::{FieldSchema, FieldType, Schema};
pub use snapshot::{CollectionSnapshot, SnapshotData, SnapshotManager};
pub use store::DocumentStore;
