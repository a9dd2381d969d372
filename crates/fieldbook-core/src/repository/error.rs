use thiserror::Error;

use crate::remote::RemoteError;

/// Failures a repository reports to its callers.
///
/// `NotFound` is kept apart from `Remote` so callers can tell "no such
/// record" from "could not ask".
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: String, id: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Failed to decode {collection} row: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {collection} payload: {source}")]
    Encode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound { .. })
    }
}
