//! Core library for fieldbook.
//!
//! Data access for the administration platform: per-collection
//! repositories over a hosted relational backend, with query results
//! memoized in a shared multi-tier cache.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fieldbook_core::cache::CacheManager;
//! use fieldbook_core::models::Programme;
//! use fieldbook_core::remote::MemoryStore;
//! use fieldbook_core::repository::{CacheConfig, FindAllOptions, Repository};
//!
//! # async fn demo() -> Result<(), fieldbook_core::repository::RepositoryError> {
//! let cache = Arc::new(CacheManager::in_memory());
//! let store = Arc::new(MemoryStore::new());
//! let programmes = Repository::<Programme>::for_entity(store, cache, CacheConfig::default());
//! let actifs = programmes
//!     .find_all(FindAllOptions::new().filter("statut", "actif"))
//!     .await?;
//! println!("{} programmes (cached: {})", actifs.data.len(), actifs.from_cache);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod models;
pub mod remote;
pub mod repository;

pub use cache::{CacheManager, CacheTier};
pub use config::Config;
pub use remote::{RemoteError, RemoteStore};
pub use repository::{Repository, RepositoryError};
