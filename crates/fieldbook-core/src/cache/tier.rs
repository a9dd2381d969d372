//! Cache tiers and their backing stores.
//!
//! - [`MemoryTier`]: a process-lifetime map.
//! - [`PersistentTier`]: a JSON document in the cache directory that
//!   survives restarts. Each entry is serialized on its own so a single
//!   corrupt entry can be dropped without losing the rest.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::CacheError;
use super::key::{CacheKey, KeyPattern};

/// Prefix distinguishing cache entries from other data in the persistent store.
pub const PERSISTENT_KEY_PREFIX: &str = "fieldbook:cache:";

/// File name of the persistent tier inside the cache directory.
const PERSISTENT_FILE: &str = "query-cache.json";

/// Version of the persistent file envelope. Files with another version are
/// discarded on open.
const PERSISTENT_FORMAT_VERSION: u32 = 1;

/// Default size budget for the persistent tier (5 MiB).
pub const DEFAULT_PERSISTENT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Memory,
    Persistent,
}

impl CacheTier {
    pub const ALL: [CacheTier; 2] = [CacheTier::Memory, CacheTier::Persistent];
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => f.pad("memory"),
            CacheTier::Persistent => f.pad("persistent"),
        }
    }
}

impl FromStr for CacheTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheTier::Memory),
            "persistent" => Ok(CacheTier::Persistent),
            other => Err(format!("Unknown cache tier: {}", other)),
        }
    }
}

/// A cached value with its expiry, as stored in a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    pub value: Value,
    /// Epoch milliseconds after which the entry is dead.
    pub expires_at: i64,
    /// Epoch milliseconds when the entry was written. Diagnostic only.
    pub cached_at: i64,
}

impl StoredEntry {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }
}

/// Operations every tier backend supports.
pub(crate) trait TierStore: Send {
    fn get(&mut self, key: &CacheKey) -> Result<Option<StoredEntry>, CacheError>;
    fn put(&mut self, key: &CacheKey, entry: StoredEntry) -> Result<(), CacheError>;
    fn remove(&mut self, key: &CacheKey) -> Result<bool, CacheError>;
    fn remove_matching(&mut self, pattern: &KeyPattern) -> Result<usize, CacheError>;
    /// Remove every entry with `now >= expires_at`. Returns how many were removed.
    fn sweep(&mut self, now_millis: i64) -> Result<usize, CacheError>;
    fn clear(&mut self) -> Result<(), CacheError>;
    fn len(&self) -> usize;
    /// `(rendered key, entry)` for every readable entry.
    fn snapshot(&self) -> Vec<(String, StoredEntry)>;
}

// ============================================================================
// Memory tier
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTier {
    entries: HashMap<CacheKey, StoredEntry>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TierStore for MemoryTier {
    fn get(&mut self, key: &CacheKey) -> Result<Option<StoredEntry>, CacheError> {
        Ok(self.entries.get(key).cloned())
    }

    fn put(&mut self, key: &CacheKey, entry: StoredEntry) -> Result<(), CacheError> {
        self.entries.insert(key.clone(), entry);
        Ok(())
    }

    fn remove(&mut self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    fn remove_matching(&mut self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(before - self.entries.len())
    }

    fn sweep(&mut self, now_millis: i64) -> Result<usize, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_millis));
        Ok(before - self.entries.len())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn snapshot(&self) -> Vec<(String, StoredEntry)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.clone()))
            .collect()
    }
}

// ============================================================================
// Persistent tier
// ============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistentFile {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// Durable tier backed by a single JSON file.
///
/// The file is the only copy of the store: every operation reads it, and
/// every change writes it back atomically. Several managers (or processes)
/// can share one cache directory and see each other's writes and removals.
/// Keys that do not carry [`PERSISTENT_KEY_PREFIX`] belong to other users of
/// the file and are never touched.
#[derive(Debug)]
pub struct PersistentTier {
    path: PathBuf,
    quota_bytes: usize,
}

type StorageMap = BTreeMap<String, String>;

impl PersistentTier {
    /// Open (or create) the persistent tier in `cache_dir`.
    ///
    /// An unreadable or outdated file is logged and treated as empty until
    /// the next write replaces it.
    pub fn open(cache_dir: &Path, quota_bytes: usize) -> Result<Self, CacheError> {
        std::fs::create_dir_all(cache_dir)?;
        let tier = Self {
            path: cache_dir.join(PERSISTENT_FILE),
            quota_bytes,
        };

        let entries = tier.load()?;
        debug!(path = %tier.path.display(), entries = entries.len(), "Opened persistent cache");
        Ok(tier)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_key(key: &CacheKey) -> String {
        format!("{}{}", PERSISTENT_KEY_PREFIX, key)
    }

    fn used_bytes(entries: &StorageMap) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    /// Current contents of the file. A missing file is an empty store.
    fn load(&self) -> Result<StorageMap, CacheError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StorageMap::new()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<PersistentFile>(&contents) {
            Ok(file) if file.version == PERSISTENT_FORMAT_VERSION => Ok(file.entries),
            Ok(file) => {
                warn!(
                    path = %self.path.display(),
                    version = file.version,
                    "Discarding persistent cache with unsupported format version"
                );
                Ok(StorageMap::new())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable persistent cache");
                Ok(StorageMap::new())
            }
        }
    }

    /// Like [`load`](Self::load) for read-only diagnostics; faults read as empty.
    fn load_or_empty(&self) -> StorageMap {
        self.load().unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to read persistent cache");
            StorageMap::new()
        })
    }

    fn write(&self, entries: StorageMap) -> Result<(), CacheError> {
        let file = PersistentFile {
            version: PERSISTENT_FORMAT_VERSION,
            entries,
        };
        let contents = serde_json::to_string(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn cache_keys(entries: &StorageMap) -> impl Iterator<Item = &String> {
        entries.keys().filter(|k| k.starts_with(PERSISTENT_KEY_PREFIX))
    }

    /// Remove the cache keys selected by `doomed` and write the store back
    /// if anything changed.
    fn remove_where(&mut self, doomed: impl Fn(&str, &str) -> bool) -> Result<usize, CacheError> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|k, v| !(k.starts_with(PERSISTENT_KEY_PREFIX) && doomed(k, v)));
        let removed = before - entries.len();
        if removed > 0 {
            self.write(entries)?;
        }
        Ok(removed)
    }

    /// Store a raw string under a cache key, bypassing serialization.
    #[cfg(test)]
    pub(crate) fn put_raw(&mut self, key: &CacheKey, raw: &str) -> Result<(), CacheError> {
        let mut entries = self.load()?;
        entries.insert(Self::storage_key(key), raw.to_string());
        self.write(entries)
    }
}

impl TierStore for PersistentTier {
    fn get(&mut self, key: &CacheKey) -> Result<Option<StoredEntry>, CacheError> {
        let storage_key = Self::storage_key(key);
        let entries = self.load()?;
        let Some(raw) = entries.get(&storage_key) else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredEntry>(raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                self.remove_where(|k, _| k == storage_key)?;
                Err(CacheError::Corrupt(format!("{}: {}", key, e)))
            }
        }
    }

    fn put(&mut self, key: &CacheKey, entry: StoredEntry) -> Result<(), CacheError> {
        let mut entries = self.load()?;
        entries.insert(Self::storage_key(key), serde_json::to_string(&entry)?);

        let needed = Self::used_bytes(&entries);
        if needed > self.quota_bytes {
            return Err(CacheError::QuotaExceeded {
                needed,
                quota: self.quota_bytes,
            });
        }
        self.write(entries)
    }

    fn remove(&mut self, key: &CacheKey) -> Result<bool, CacheError> {
        let storage_key = Self::storage_key(key);
        Ok(self.remove_where(|k, _| k == storage_key)? > 0)
    }

    fn remove_matching(&mut self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        self.remove_where(|k, _| pattern.matches_rendered(&k[PERSISTENT_KEY_PREFIX.len()..]))
    }

    fn sweep(&mut self, now_millis: i64) -> Result<usize, CacheError> {
        // Corrupt entries go too
        self.remove_where(|_, raw| match serde_json::from_str::<StoredEntry>(raw) {
            Ok(entry) => entry.is_expired(now_millis),
            Err(_) => true,
        })
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.remove_where(|_, _| true)?;
        Ok(())
    }

    fn len(&self) -> usize {
        Self::cache_keys(&self.load_or_empty()).count()
    }

    fn snapshot(&self) -> Vec<(String, StoredEntry)> {
        let entries = self.load_or_empty();
        Self::cache_keys(&entries)
            .filter_map(|k| {
                let entry = serde_json::from_str::<StoredEntry>(&entries[k]).ok()?;
                Some((k[PERSISTENT_KEY_PREFIX.len()..].to_string(), entry))
            })
            .collect()
    }
}
