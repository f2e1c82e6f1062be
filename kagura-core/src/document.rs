//! # Documents and Identifiers
//!
//! A document is an identified, timestamped JSON-like body. Identifiers
//! are opaque strings of the form `<monotonic-millis>_<9-char base36>`:
//! the millisecond prefix keeps lexicographic order roughly equal to
//! insertion order, the random suffix disambiguates same-millisecond
//! inserts. Bodies are mutated only by replacing the whole body and
//! bumping `updated_at`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::value::Value;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Last millisecond handed out by the generator. `fetch_max` keeps the
/// prefix monotonic even if the wall clock steps backwards.
static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Opaque document identifier, unique within its collection for the
/// collection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Generate a fresh identifier: monotonic milliseconds, an
    /// underscore, then nine random base36 characters.
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let millis = LAST_MILLIS.fetch_max(now, Ordering::SeqCst).max(now);

        let mut rng = rand::thread_rng();
        let mut id = String::with_capacity(24);
        id.push_str(&millis.to_string());
        id.push('_');
        for _ in 0..SUFFIX_LEN {
            id.push(BASE36[rng.gen_range(0..36)] as char);
        }
        DocumentId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// A stored document: identifier, object body, lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a document with a generated id and current timestamps.
    /// The body must be an object value.
    pub fn new(body: Value) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::generate(),
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Field lookup on the body.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// Replace the whole body and bump `updated_at`.
    pub fn replace_body(&mut self, body: Value) {
        self.body = body;
        self.updated_at = Utc::now();
    }

    /// Rough in-memory footprint: id, body, fixed header. Feeds the
    /// memory-ceiling accounting.
    pub fn estimated_size(&self) -> usize {
        std::mem::size_of::<Document>() + self.id.0.len() + self.body.estimated_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_sortable() {
        let mut ids: Vec<DocumentId> = (0..1000).map(|_| DocumentId::generate()).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 1000);

        // Prefixes never decrease: sorting by id preserves generation order
        // at millisecond granularity.
        ids.sort();
        let millis: Vec<&str> = ids.iter().map(|id| id.0.split('_').next().unwrap()).collect();
        for w in millis.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn id_format() {
        let id = DocumentId::generate();
        let (prefix, suffix) = id.0.split_once('_').expect("underscore separator");
        assert!(prefix.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn replace_body_bumps_updated_at() {
        let mut doc = Document::new(Value::object(vec![("a", Value::Int(1))]));
        let created = doc.created_at;
        let first_update = doc.updated_at;
        doc.replace_body(Value::object(vec![("a", Value::Int(2))]));
        assert_eq!(doc.created_at, created);
        assert!(doc.updated_at >= first_update);
        assert_eq!(doc.get("a"), Some(&Value::Int(2)));
    }
}
