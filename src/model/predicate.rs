//! Query predicates and pagination

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison applied to a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op", content = "value")]
pub enum QueryOperator {
    Eq(serde_json::Value),
    Ne(serde_json::Value),
    Lt(serde_json::Value),
    Le(serde_json::Value),
    Gt(serde_json::Value),
    Ge(serde_json::Value),
    Contains(String),
    BeginsWith(String),
    Between(serde_json::Value, serde_json::Value),
}

/// Filter evaluated by the storage engine against local state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryPredicate {
    Field { field: String, operator: QueryOperator },
    And(Vec<QueryPredicate>),
    Or(Vec<QueryPredicate>),
    Not(Box<QueryPredicate>),
}

impl QueryPredicate {
    pub fn field(field: impl Into<String>, operator: QueryOperator) -> Self {
        QueryPredicate::Field { field: field.into(), operator }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::field(field, QueryOperator::Eq(value.into()))
    }

    pub fn and(self, other: QueryPredicate) -> Self {
        match self {
            QueryPredicate::And(mut all) => {
                all.push(other);
                QueryPredicate::And(all)
            }
            first => QueryPredicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: QueryPredicate) -> Self {
        match self {
            QueryPredicate::Or(mut any) => {
                any.push(other);
                QueryPredicate::Or(any)
            }
            first => QueryPredicate::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        QueryPredicate::Not(Box::new(self))
    }

    /// Evaluate against a JSON model payload.
    ///
    /// A missing field never matches a comparison.
    pub fn evaluate(&self, model: &serde_json::Value) -> bool {
        match self {
            QueryPredicate::Field { field, operator } => match model.get(field) {
                Some(value) => operator.matches(value),
                None => false,
            },
            QueryPredicate::And(all) => all.iter().all(|p| p.evaluate(model)),
            QueryPredicate::Or(any) => any.iter().any(|p| p.evaluate(model)),
            QueryPredicate::Not(inner) => !inner.evaluate(model),
        }
    }
}

impl QueryOperator {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            QueryOperator::Eq(expected) => value == expected,
            QueryOperator::Ne(expected) => value != expected,
            QueryOperator::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            QueryOperator::Le(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            QueryOperator::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            QueryOperator::Ge(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            QueryOperator::Contains(needle) => match value {
                serde_json::Value::String(s) => s.contains(needle.as_str()),
                serde_json::Value::Array(items) => items
                    .iter()
                    .any(|item| item.as_str() == Some(needle.as_str())),
                _ => false,
            },
            QueryOperator::BeginsWith(prefix) => value
                .as_str()
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
            QueryOperator::Between(low, high) => {
                matches!(compare(value, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(value, high), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }
}

/// Orders numbers against numbers and strings against strings; anything else is incomparable
fn compare(left: &serde_json::Value, right: &serde_json::Value) -> Option<Ordering> {
    match (left, right) {
        (serde_json::Value::Number(a), serde_json::Value::Number(b)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (serde_json::Value::String(a), serde_json::Value::String(b)) => Some(a.cmp(b)),
        (serde_json::Value::Bool(a), serde_json::Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Zero-based page index
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn first(limit: u32) -> Self {
        Self { page: 0, limit }
    }

    pub fn offset(&self) -> usize {
        self.page as usize * self.limit as usize
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 0, limit: 100 }
    }
}

/// A query resolved against a registered schema
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub schema: super::SchemaRef,
    pub predicate: Option<QueryPredicate>,
    pub pagination: Option<Pagination>,
}

impl QueryRequest {
    /// Apply predicate and pagination to an in-memory set of models
    pub fn apply<'a, I>(&self, models: I) -> Vec<serde_json::Value>
    where
        I: IntoIterator<Item = &'a serde_json::Value>,
    {
        let matching = models
            .into_iter()
            .filter(|m| self.predicate.as_ref().map(|p| p.evaluate(m)).unwrap_or(true));

        match self.pagination {
            Some(page) => matching
                .skip(page.offset())
                .take(page.limit as usize)
                .cloned()
                .collect(),
            None => matching.cloned().collect(),
        }
    }
}
