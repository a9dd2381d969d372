//! Data models for the administration platform's collections.
//!
//! - `Programme`: support programmes run by the organisation
//! - `Beneficiary`, `Mentor`: people enrolled in or supporting programmes
//! - `FinanceEntry`: income and expense lines attached to a programme
//!
//! Field names follow the backend's column names through serde renames.

pub mod finance;
pub mod person;
pub mod programme;

use serde::{de::DeserializeOwned, Serialize};

pub use finance::{balance, EntryKind, FinanceEntry};
pub use person::{Beneficiary, Mentor};
pub use programme::{Programme, ProgrammeStatus};

/// A type stored as rows of one remote collection.
pub trait Entity: Serialize + DeserializeOwned {
    /// Name of the remote collection (table).
    const COLLECTION: &'static str;
}

/// Collections known to the platform, in display order.
pub const COLLECTIONS: [&str; 4] = [
    Programme::COLLECTION,
    Beneficiary::COLLECTION,
    Mentor::COLLECTION,
    FinanceEntry::COLLECTION,
];
