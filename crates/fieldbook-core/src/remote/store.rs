use async_trait::async_trait;
use serde_json::Value;

use super::query::{Filter, SelectQuery};
use super::RemoteError;

/// The hosted tabular backend, seen through a query-builder interface.
///
/// Rows travel as JSON objects; decoding into domain types happens in the
/// repository.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows matching the query, ordered and windowed.
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, RemoteError>;

    /// The row with the given id, or `None` if there is none.
    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, RemoteError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, collection: &str, record: &Value) -> Result<Value, RemoteError>;

    /// Update one row by id and return it. A missing row is `RemoteError::NotFound`.
    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Value, RemoteError>;

    /// Delete one row by id.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Number of matching rows, without fetching them.
    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, RemoteError>;
}
