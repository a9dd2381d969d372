//! In-process implementation of [`RemoteStore`].
//!
//! Holds tables as vectors of JSON rows and applies the same query
//! semantics as the hosted backend. Used for tests and offline demos.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::query::{Direction, Filter, Order, SelectQuery};
use super::{RemoteError, RemoteStore};
use crate::cache::key::id_string;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicI64,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Seed a table with rows. Rows keep whatever ids they carry.
    pub fn with_rows(self, collection: &str, rows: Vec<Value>) -> Self {
        let max_id = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        self.next_id.fetch_max(max_id + 1, AtomicOrdering::SeqCst);
        self.lock_tables()
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Number of operations served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    /// While offline, every operation fails with a server error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.lock_tables().get(collection).cloned().unwrap_or_default()
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin(&self, op: &str, collection: &str) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        debug!(op, collection, "Memory store call");
        if self.offline.load(AtomicOrdering::SeqCst) {
            return Err(RemoteError::Server("store offline".to_string()));
        }
        Ok(())
    }

    fn has_id(row: &Value, id: &str) -> bool {
        row.get("id").and_then(id_string).as_deref() == Some(id)
    }
}

/// Order JSON values: nulls last, then numbers, strings and booleans by value.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn compare_rows(a: &Value, b: &Value, order: &[Order]) -> Ordering {
    for o in order {
        let left = a.get(&o.column).unwrap_or(&Value::Null);
        let right = b.get(&o.column).unwrap_or(&Value::Null);
        let ord = match o.direction {
            Direction::Asc => compare_values(left, right),
            Direction::Desc => compare_values(right, left),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, RemoteError> {
        self.begin("select", &query.collection)?;
        let mut rows: Vec<Value> = self
            .lock_tables()
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        }

        if let Some(range) = query.range {
            rows = rows
                .into_iter()
                .skip(range.offset as usize)
                .take(range.limit as usize)
                .collect();
        }
        Ok(rows)
    }

    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, RemoteError> {
        self.begin("select_by_id", collection)?;
        Ok(self
            .lock_tables()
            .get(collection)
            .and_then(|rows| rows.iter().find(|row| Self::has_id(row, id)).cloned()))
    }

    async fn insert(&self, collection: &str, record: &Value) -> Result<Value, RemoteError> {
        self.begin("insert", collection)?;
        let Value::Object(fields) = record else {
            return Err(RemoteError::Query("record must be a JSON object".to_string()));
        };

        let mut row = fields.clone();
        if !row.contains_key("id") {
            let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
            row.insert("id".to_string(), Value::from(id));
        }
        let row = Value::Object(row);

        let mut tables = self.lock_tables();
        let table = tables.entry(collection.to_string()).or_default();
        if let Some(id) = row.get("id").and_then(id_string) {
            if table.iter().any(|existing| Self::has_id(existing, &id)) {
                return Err(RemoteError::Query(format!("duplicate id {}", id)));
            }
        }
        table.push(row.clone());
        Ok(row)
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Value, RemoteError> {
        self.begin("update", collection)?;
        let Value::Object(changes) = patch else {
            return Err(RemoteError::Query("patch must be a JSON object".to_string()));
        };

        let mut tables = self.lock_tables();
        let row = tables
            .get_mut(collection)
            .and_then(|rows| rows.iter_mut().find(|row| Self::has_id(row, id)))
            .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", collection, id)))?;

        if let Value::Object(fields) = &mut *row {
            for (column, value) in changes {
                if column != "id" {
                    fields.insert(column.clone(), value.clone());
                }
            }
        }
        Ok(row.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.begin("delete", collection)?;
        if let Some(rows) = self.lock_tables().get_mut(collection) {
            rows.retain(|row| !Self::has_id(row, id));
        }
        Ok(())
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, RemoteError> {
        self.begin("count", collection)?;
        let count = self
            .lock_tables()
            .get(collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .count()
            })
            .unwrap_or(0);
        Ok(count as u64)
    }
}
