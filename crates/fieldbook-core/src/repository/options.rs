use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::CacheTier;
use crate::remote::Order;

/// Default lifetime of cached query results.
/// 5 minutes keeps listings responsive without letting edits from other
/// sessions go unseen for long.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// How a repository caches its reads. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub tier: CacheTier,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: DEFAULT_CACHE_TTL,
            tier: CacheTier::Memory,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    pub fn memory(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            tier: CacheTier::Memory,
        }
    }

    pub fn persistent(ttl: Duration) -> Self {
        Self {
            enabled: true,
            ttl,
            tier: CacheTier::Persistent,
        }
    }
}

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub page_size: u64,
}

impl Pagination {
    pub fn new(page: u64, page_size: u64) -> Self {
        Self { page, page_size }
    }

    /// Rows to skip. Page 0 is read as page 1.
    pub fn offset(&self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.page_size)
    }
}

/// Parameters of a `find_all` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FindAllOptions {
    /// Column → value. Array values mean "one of".
    pub filters: Map<String, Value>,
    pub pagination: Option<Pagination>,
    pub order_by: Option<Order>,
    /// Consult and populate the cache for this call.
    pub cache: bool,
}

impl Default for FindAllOptions {
    fn default() -> Self {
        Self {
            filters: Map::new(),
            pagination: None,
            order_by: None,
            cache: true,
        }
    }
}

impl FindAllOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(column.into(), value.into());
        self
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.pagination = Some(Pagination::new(page, page_size));
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Options for `create`, `update` and `delete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub invalidate_cache: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            invalidate_cache: true,
        }
    }
}

impl WriteOptions {
    pub fn keep_cache() -> Self {
        Self {
            invalidate_cache: false,
        }
    }
}

/// A read result and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_offset() {
        assert_eq!(Pagination::new(1, 20).offset(), 0);
        assert_eq!(Pagination::new(3, 20).offset(), 40);
        assert_eq!(Pagination::new(0, 20).offset(), 0);
    }

    #[test]
    fn test_pagination_serializes_camel_case() {
        let v = serde_json::to_value(Pagination::new(2, 10)).unwrap();
        assert_eq!(v, serde_json::json!({"page": 2, "pageSize": 10}));
    }

    #[test]
    fn test_defaults() {
        assert!(FindAllOptions::new().cache);
        assert!(WriteOptions::default().invalidate_cache);
        assert!(!WriteOptions::keep_cache().invalidate_cache);
        assert!(!CacheConfig::disabled().enabled);
        assert_eq!(CacheConfig::default().tier, CacheTier::Memory);
    }
}
