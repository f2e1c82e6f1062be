//! # Access-Path Planner
//!
//! Chooses how candidate ids are produced for a filter:
//!
//! 1. indexed equality on the first field with an `eq` criterion and an
//!    equality-capable index (estimated cost 1)
//! 2. indexed range scan on the first field with ordered operators and
//!    an ordered-capable index (O(log n + k))
//! 3. full collection scan
//!
//! "First" means declaration order within the filter, which makes plans
//! deterministic for testing. The executor re-applies the whole filter
//! as a residual predicate, so the planner only has to produce a
//! superset of the matching documents.

use kagura_core::value::Value;
use kagura_index::{IndexCapability, IndexManager};

use crate::filter::{Criterion, Filter};

/// One bound of a range access path: value plus inclusivity.
pub type Bound = (Value, bool);

/// How candidate ids are produced.
#[derive(Debug, Clone)]
pub enum AccessPath {
    Equality { field: String, value: Value },
    Range {
        field: String,
        lo: Option<Bound>,
        hi: Option<Bound>,
    },
    FullScan,
}

/// A planned query.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub access: AccessPath,
}

impl QueryPlan {
    /// Relative cost estimate used for logging and `explain`-style
    /// output: equality is a point probe, a range is a descent plus a
    /// walk, a scan touches everything.
    pub fn estimated_cost(&self) -> f64 {
        match &self.access {
            AccessPath::Equality { .. } => 1.0,
            AccessPath::Range { .. } => 64.0,
            AccessPath::FullScan => f64::MAX,
        }
    }

    pub fn describe(&self) -> String {
        match &self.access {
            AccessPath::Equality { field, .. } => format!("equality({field})"),
            AccessPath::Range { field, .. } => format!("range({field})"),
            AccessPath::FullScan => "full_scan".to_string(),
        }
    }
}

/// Plan the access path for `filter` over `collection`.
pub fn plan(manager: &IndexManager, collection: &str, filter: &Filter) -> QueryPlan {
    // Pass 1: indexed equality wins outright.
    for ff in filter.field_clauses() {
        let eq_value = ff.criteria.iter().find_map(|c| match c {
            Criterion::Eq(v) => Some(v.clone()),
            _ => None,
        });
        if let Some(value) = eq_value {
            if manager.has_index(collection, &ff.field, IndexCapability::Equality) {
                return QueryPlan {
                    access: AccessPath::Equality {
                        field: ff.field.clone(),
                        value,
                    },
                };
            }
        }
    }

    // Pass 2: indexed range on the first field carrying ordered
    // operators. Multiple bounds on one side fold to the tightest; the
    // residual predicate covers any remaining slack.
    for ff in filter.field_clauses() {
        if !ff.criteria.iter().any(Criterion::is_range) {
            continue;
        }
        if !manager.has_index(collection, &ff.field, IndexCapability::Ordered) {
            continue;
        }
        let mut lo: Option<Bound> = None;
        let mut hi: Option<Bound> = None;
        for criterion in &ff.criteria {
            match criterion {
                Criterion::Gt(v) => tighten_lo(&mut lo, v.clone(), false),
                Criterion::Gte(v) => tighten_lo(&mut lo, v.clone(), true),
                Criterion::Lt(v) => tighten_hi(&mut hi, v.clone(), false),
                Criterion::Lte(v) => tighten_hi(&mut hi, v.clone(), true),
                _ => {}
            }
        }
        return QueryPlan {
            access: AccessPath::Range {
                field: ff.field.clone(),
                lo,
                hi,
            },
        };
    }

    QueryPlan {
        access: AccessPath::FullScan,
    }
}

fn tighten_lo(current: &mut Option<Bound>, value: Value, inclusive: bool) {
    let replace = match current {
        None => true,
        Some((existing, existing_inclusive)) => match existing.cmp_total(&value) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Equal => *existing_inclusive && !inclusive,
            std::cmp::Ordering::Greater => false,
        },
    };
    if replace {
        *current = Some((value, inclusive));
    }
}

fn tighten_hi(current: &mut Option<Bound>, value: Value, inclusive: bool) {
    let replace = match current {
        None => true,
        Some((existing, existing_inclusive)) => match existing.cmp_total(&value) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => *existing_inclusive && !inclusive,
            std::cmp::Ordering::Less => false,
        },
    };
    if replace {
        *current = Some((value, inclusive));
    }
}
