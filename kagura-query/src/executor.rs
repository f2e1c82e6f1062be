//! # Query Executor
//!
//! Runs a planned query end to end:
//!
//! 1. candidate ids from the chosen access path (or a full scan)
//! 2. the whole filter re-evaluated against each live document; this
//!    residual predicate keeps results correct even when another index
//!    lags a concurrent mutation
//! 3. stable multi-key sort (nulls last ascending, first descending)
//! 4. skip, then limit
//! 5. projection, always retaining the identifier
//!
//! `count` runs the same pipeline without materializing projections.

use serde::{Deserialize, Serialize};
use tracing::debug;

use kagura_core::document::{Document, DocumentId};
use kagura_core::value::Value;
use kagura_core::Result;
use kagura_index::IndexManager;

use crate::filter::Filter;
use crate::plan::{plan, AccessPath, QueryPlan};

/// Per-key sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Options accepted by `find`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub sort: Vec<(String, SortOrder)>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub projection: Option<Vec<String>>,
}

impl QueryOptions {
    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.projection = Some(fields);
        self
    }
}

/// Read access the executor needs from the storage layer. Scans must be
/// stable for the lifetime of the returned iterator.
pub trait DocumentSource {
    fn get(&self, id: &DocumentId) -> Option<Document>;
    fn scan(&self) -> Box<dyn Iterator<Item = Document> + '_>;
}

/// Stateless query executor.
#[derive(Default)]
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Candidate ids for a plan, before residual filtering. `None`
    /// means the plan is a full scan.
    pub fn candidate_ids(
        &self,
        manager: &IndexManager,
        collection: &str,
        plan: &QueryPlan,
    ) -> Option<Vec<DocumentId>> {
        match &plan.access {
            AccessPath::Equality { field, value } => {
                manager.lookup_equal(collection, field, value)
            }
            AccessPath::Range { field, lo, hi } => manager.lookup_range(
                collection,
                field,
                lo.as_ref().map(|(v, _)| v),
                hi.as_ref().map(|(v, _)| v),
                lo.as_ref().map_or(true, |(_, inclusive)| *inclusive),
                hi.as_ref().map_or(true, |(_, inclusive)| *inclusive),
            ),
            AccessPath::FullScan => None,
        }
    }

    /// Execute `filter` and return matching documents after the full
    /// option pipeline, along with the plan that produced them.
    pub fn find_with_plan(
        &self,
        source: &dyn DocumentSource,
        manager: &IndexManager,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<(QueryPlan, Vec<Document>)> {
        let plan = plan(manager, collection, filter);
        debug!(collection, plan = %plan.describe(), "executing query");

        let mut matched: Vec<Document> = match self.candidate_ids(manager, collection, &plan) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| source.get(id))
                .filter(|doc| filter.matches(&doc.body))
                .collect(),
            None => source.scan().filter(|doc| filter.matches(&doc.body)).collect(),
        };

        if !options.sort.is_empty() {
            sort_documents(&mut matched, &options.sort);
        }

        let iter = matched.into_iter().skip(options.skip);
        let mut selected: Vec<Document> = match options.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        };

        if let Some(projection) = &options.projection {
            for doc in &mut selected {
                project_fields(doc, projection);
            }
        }
        Ok((plan, selected))
    }

    pub fn find(
        &self,
        source: &dyn DocumentSource,
        manager: &IndexManager,
        collection: &str,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Document>> {
        self.find_with_plan(source, manager, collection, filter, options)
            .map(|(_, docs)| docs)
    }

    /// Count matches without materializing projections. Sorting cannot
    /// change the count, so only the candidate and residual stages run.
    pub fn count(
        &self,
        source: &dyn DocumentSource,
        manager: &IndexManager,
        collection: &str,
        filter: &Filter,
    ) -> Result<usize> {
        let plan = plan(manager, collection, filter);
        let count = match self.candidate_ids(manager, collection, &plan) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| source.get(id))
                .filter(|doc| filter.matches(&doc.body))
                .count(),
            None => source.scan().filter(|doc| filter.matches(&doc.body)).count(),
        };
        Ok(count)
    }
}

/// Stable multi-key sort. A missing field sorts as null: last on an
/// ascending key, first on a descending one.
fn sort_documents(docs: &mut [Document], keys: &[(String, SortOrder)]) {
    docs.sort_by(|a, b| {
        for (field, order) in keys {
            let av = a.get(field).unwrap_or(&Value::Null);
            let bv = b.get(field).unwrap_or(&Value::Null);
            let ordering = match (av.is_null(), bv.is_null()) {
                (true, true) => std::cmp::Ordering::Equal,
                // Ascending puts nulls last; descending reverses that.
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => av.cmp_total(bv),
            };
            let ordering = match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Retain only the projected fields of the body. The identifier lives
/// outside the body and always survives.
pub fn project_fields(doc: &mut Document, fields: &[String]) {
    if let Value::Object(pairs) = &mut doc.body {
        pairs.retain(|(k, _)| fields.iter().any(|f| f == k));
    }
}
