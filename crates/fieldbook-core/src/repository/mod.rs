//! Generic per-collection repositories.
//!
//! A `Repository<T>` gives cached reads and cache-coherent writes over one
//! remote collection. All repositories share one `CacheManager`; their keys
//! are namespaced by collection name so they never collide.

pub mod error;
pub mod options;
pub mod repo;

pub use error::RepositoryError;
pub use options::{CacheConfig, Fetched, FindAllOptions, Pagination, WriteOptions, DEFAULT_CACHE_TTL};
pub use repo::Repository;
