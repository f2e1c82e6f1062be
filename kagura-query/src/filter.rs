//! # Filter Language
//!
//! A filter is an object mapping field names to criteria. A criterion is
//! either a literal (equality) or an object of operator → operand pairs:
//!
//! ```text
//! { name: "x" }                        equality literal
//! { ts: { gte: 10, lt: 20 } }          range operators
//! { tag: { in: ["a", "b"] } }          membership
//! { and: [ {...}, {...} ] }            logical combinators
//! ```
//!
//! Operators: `eq ne gt gte lt lte in nin exists`. Top-level logical
//! keys: `and`, `or`, `not`. Anything else is rejected with
//! `InvalidQuery` before evaluation starts; a malformed filter never
//! produces partial results.
//!
//! The parsed form preserves field declaration order; the planner relies
//! on it for deterministic tie-breaking.

use kagura_core::value::Value;
use kagura_core::{Error, Result};

/// A single operator applied to one field.
#[derive(Debug, Clone)]
pub enum Criterion {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
}

impl Criterion {
    /// Is this one of the ordered-comparison operators a range scan can
    /// serve?
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Criterion::Gt(_) | Criterion::Gte(_) | Criterion::Lt(_) | Criterion::Lte(_)
        )
    }
}

/// All criteria on one field, in declaration order.
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pub field: String,
    pub criteria: Vec<Criterion>,
}

/// One top-level clause of a filter.
#[derive(Debug, Clone)]
pub enum Clause {
    Field(FieldFilter),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

/// A parsed filter: the conjunction of its clauses, in declaration
/// order. An empty filter matches every document.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

const OPERATORS: &[&str] = &["eq", "ne", "gt", "gte", "lt", "lte", "in", "nin", "exists"];

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidQuery {
        message: message.into(),
    }
}

impl Filter {
    /// Parse a filter document. Fails with `InvalidQuery` on any
    /// malformed construct.
    pub fn parse(value: &Value) -> Result<Filter> {
        let Value::Object(pairs) = value else {
            return Err(invalid(format!(
                "filter must be an object, got {}",
                value.type_name()
            )));
        };
        let mut clauses = Vec::with_capacity(pairs.len());
        for (key, v) in pairs {
            match key.as_str() {
                "and" | "or" => {
                    let Value::Array(items) = v else {
                        return Err(invalid(format!("`{key}` expects an array of filters")));
                    };
                    let filters = items.iter().map(Filter::parse).collect::<Result<Vec<_>>>()?;
                    if key == "and" {
                        clauses.push(Clause::And(filters));
                    } else {
                        clauses.push(Clause::Or(filters));
                    }
                }
                "not" => {
                    clauses.push(Clause::Not(Box::new(Filter::parse(v)?)));
                }
                field => {
                    clauses.push(Clause::Field(FieldFilter {
                        field: field.to_string(),
                        criteria: Self::parse_criteria(field, v)?,
                    }));
                }
            }
        }
        Ok(Filter { clauses })
    }

    fn parse_criteria(field: &str, value: &Value) -> Result<Vec<Criterion>> {
        let Value::Object(pairs) = value else {
            // Any non-object literal is an equality criterion.
            return Ok(vec![Criterion::Eq(value.clone())]);
        };
        let operator_keys = pairs
            .iter()
            .filter(|(k, _)| OPERATORS.contains(&k.as_str()))
            .count();
        if operator_keys == 0 {
            // An object with no operator keys is an equality literal.
            return Ok(vec![Criterion::Eq(value.clone())]);
        }
        if operator_keys != pairs.len() {
            return Err(invalid(format!(
                "criterion on `{field}` mixes operators with literal fields"
            )));
        }
        pairs
            .iter()
            .map(|(op, operand)| Self::parse_operator(field, op, operand))
            .collect()
    }

    fn parse_operator(field: &str, op: &str, operand: &Value) -> Result<Criterion> {
        Ok(match op {
            "eq" => Criterion::Eq(operand.clone()),
            "ne" => Criterion::Ne(operand.clone()),
            "gt" => Criterion::Gt(operand.clone()),
            "gte" => Criterion::Gte(operand.clone()),
            "lt" => Criterion::Lt(operand.clone()),
            "lte" => Criterion::Lte(operand.clone()),
            "in" | "nin" => {
                let Value::Array(items) = operand else {
                    return Err(invalid(format!("`{op}` on `{field}` expects an array")));
                };
                if op == "in" {
                    Criterion::In(items.clone())
                } else {
                    Criterion::Nin(items.clone())
                }
            }
            "exists" => {
                let Value::Bool(b) = operand else {
                    return Err(invalid(format!("`exists` on `{field}` expects a boolean")));
                };
                Criterion::Exists(*b)
            }
            other => return Err(invalid(format!("unsupported operator `{other}`"))),
        })
    }

    /// Evaluate the filter against a document body. This is the residual
    /// predicate: the executor runs it over every candidate, including
    /// the criteria that drove index selection.
    pub fn matches(&self, body: &Value) -> bool {
        self.clauses.iter().all(|clause| match clause {
            Clause::Field(ff) => ff
                .criteria
                .iter()
                .all(|c| criterion_matches(body.get(&ff.field), c)),
            Clause::And(filters) => filters.iter().all(|f| f.matches(body)),
            Clause::Or(filters) => filters.iter().any(|f| f.matches(body)),
            Clause::Not(inner) => !inner.matches(body),
        })
    }

    /// Top-level field clauses in declaration order, for the planner.
    pub fn field_clauses(&self) -> impl Iterator<Item = &FieldFilter> {
        self.clauses.iter().filter_map(|c| match c {
            Clause::Field(ff) => Some(ff),
            _ => None,
        })
    }
}

fn criterion_matches(actual: Option<&Value>, criterion: &Criterion) -> bool {
    match criterion {
        Criterion::Eq(expected) => actual.is_some_and(|v| v == expected),
        // `ne` and `nin` treat a missing field as not-equal.
        Criterion::Ne(expected) => !actual.is_some_and(|v| v == expected),
        Criterion::Gt(bound) => ordered(actual, bound).is_some_and(std::cmp::Ordering::is_gt),
        Criterion::Gte(bound) => ordered(actual, bound).is_some_and(std::cmp::Ordering::is_ge),
        Criterion::Lt(bound) => ordered(actual, bound).is_some_and(std::cmp::Ordering::is_lt),
        Criterion::Lte(bound) => ordered(actual, bound).is_some_and(std::cmp::Ordering::is_le),
        Criterion::In(set) => actual.is_some_and(|v| set.iter().any(|m| m == v)),
        Criterion::Nin(set) => !actual.is_some_and(|v| set.iter().any(|m| m == v)),
        Criterion::Exists(expected) => actual.is_some() == *expected,
    }
}

/// Ordered operators only compare values of the same type class; a
/// missing field or a class mismatch never matches.
fn ordered(actual: Option<&Value>, bound: &Value) -> Option<std::cmp::Ordering> {
    let v = actual?;
    v.same_type_class(bound).then(|| v.cmp_total(bound))
}
