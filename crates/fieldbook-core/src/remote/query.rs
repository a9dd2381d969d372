//! Query description passed to a [`RemoteStore`](super::RemoteStore).
//!
//! `SelectQuery` is a small builder over the operations the backend
//! supports: equality and set-membership filters, ordering, and an
//! offset/limit window.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single column predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn one_of(column: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::In {
            column: column.into(),
            values,
        }
    }

    /// An array value becomes a set-membership predicate, anything else
    /// an equality.
    pub fn from_entry(column: &str, value: &Value) -> Self {
        match value {
            Value::Array(values) => Filter::one_of(column, values.clone()),
            other => Filter::eq(column, other.clone()),
        }
    }

    /// Turn a `{column: value}` map into predicates, in column order.
    pub fn from_map(filters: &Map<String, Value>) -> Vec<Self> {
        let mut columns: Vec<&String> = filters.keys().collect();
        columns.sort();
        columns
            .into_iter()
            .map(|column| Filter::from_entry(column, &filters[column]))
            .collect()
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => column,
        }
    }

    /// Evaluate the predicate against a row.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq { value, .. } => values_equal(cell, value),
            Filter::In { values, .. } => values.iter().any(|v| values_equal(cell, v)),
        }
    }
}

/// Compare JSON values, treating numbers by value so `1` equals `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }

    /// Parse `column`, `column.asc` or `column.desc`.
    pub fn parse(raw: &str) -> Self {
        match raw.rsplit_once('.') {
            Some((column, "desc")) => Order::desc(column),
            Some((column, "asc")) => Order::asc(column),
            _ => Order::asc(raw),
        }
    }
}

/// An offset/limit window over the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub range: Option<Range>,
}

impl SelectQuery {
    pub fn from(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn range(mut self, offset: u64, limit: u64) -> Self {
        self.range = Some(Range { offset, limit });
        self
    }
}
