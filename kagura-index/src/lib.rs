//! # KaguraDB Index Subsystem
//!
//! The dual-index core: equality lookups through Robin Hood hashing,
//! ordered range scans through a B+ tree, coordinated by the index
//! manager.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Index Manager                          │
//! │        (collection, field) → IndexBundle {HI/SHI, OI}        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Robin Hood  │    │   Sharded   │    │   B+ Tree   │      │
//! │  │ Hash Index  │    │  Fan-out    │    │   Ordered   │      │
//! │  │ (equality)  │    │ (K shards)  │    │   (ranges)  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `hash`: open-addressed Robin Hood table with backward-shift deletes
//! - `sharded`: fan-out over K independent tables by a second mixer
//! - `btree`: arena-allocated B+ tree with linked leaves
//! - `manager`: bundle ownership, mutation fan-out with rollback

pub mod btree;
pub mod hash;
pub mod manager;
pub mod sharded;

pub use btree::{BTreeIndex, BTreeIndexStats};
pub use hash::{HashIndex, HashIndexStats};
pub use manager::{
    BundleStats, IndexCapability, IndexDescriptor, IndexKind, IndexManager, IndexOptions,
};
pub use sharded::{ShardedHashIndex, ShardedStats};
