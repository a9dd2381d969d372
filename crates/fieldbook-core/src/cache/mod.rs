//! Multi-tier query cache.
//!
//! This module provides the `CacheManager` that repositories use to memoize
//! query results. Entries expire after a per-repository TTL and can be
//! invalidated by pattern across every tier.
//!
//! Tiers:
//! - `Memory`: process-lifetime map, swept periodically
//! - `Persistent`: JSON document in the cache directory, swept lazily

pub mod clock;
pub mod error;
pub mod key;
pub mod manager;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CacheError;
pub use key::{CacheKey, KeyPattern};
pub use manager::{CacheEntryInfo, CacheManager, CacheStats, TierSelection, DEFAULT_SWEEP_INTERVAL};
pub use tier::{CacheTier, DEFAULT_PERSISTENT_QUOTA_BYTES};
