use thiserror::Error;

/// Faults raised inside a cache tier.
///
/// These never leave the cache manager: every public cache operation logs
/// them and degrades to a miss or a skipped write.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub fn is_quota(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }
}
