//! Remote data client module.
//!
//! This module provides the `RemoteStore` trait through which repositories
//! reach the hosted relational backend, plus two implementations:
//!
//! - `RestClient`: HTTP client for the hosted backend's REST interface
//! - `MemoryStore`: in-process tables with the same query semantics

pub mod error;
pub mod memory;
pub mod query;
pub mod rest;
pub mod store;

pub use error::RemoteError;
pub use memory::MemoryStore;
pub use query::{Direction, Filter, Order, Range, SelectQuery};
pub use rest::RestClient;
pub use store::RemoteStore;
