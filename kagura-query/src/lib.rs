//! # KaguraDB Query Engine
//!
//! Parses filter documents, plans an access path against the index
//! manager, and executes the find/count pipeline.
//!
//! ## Pipeline
//!
//! ```text
//! filter document
//!   │  parse (InvalidQuery on malformed input)
//!   ▼
//! Filter ──► planner ──► AccessPath (equality / range / full scan)
//!   │                        │ candidate ids
//!   ▼                        ▼
//! residual predicate ◄── live documents
//!   │
//!   ▼
//! sort → skip → limit → projection
//! ```
//!
//! The query-result cache sits above the pipeline, keyed by collection
//! and a filter/options fingerprint, stamped with the collection version
//! at execution time.

pub mod cache;
pub mod executor;
pub mod filter;
pub mod plan;

pub use cache::{QueryCache, QueryCacheStats};
pub use executor::{DocumentSource, QueryExecutor, QueryOptions, SortOrder};
pub use filter::{Clause, Criterion, FieldFilter, Filter};
pub use plan::{plan, AccessPath, QueryPlan};
