use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::key::{CacheKey, KeyPattern};
use super::tier::{CacheTier, MemoryTier, PersistentTier, StoredEntry, TierStore};

/// How often the background sweeper clears expired memory entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which tiers a `clear` applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSelection {
    One(CacheTier),
    All,
}

impl From<CacheTier> for TierSelection {
    fn from(tier: CacheTier) -> Self {
        TierSelection::One(tier)
    }
}

/// Entry counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub memory: usize,
    pub persistent: usize,
    pub persistent_enabled: bool,
}

impl CacheStats {
    pub fn total(&self) -> usize {
        self.memory + self.persistent
    }
}

/// A cached entry as seen by diagnostics.
#[derive(Debug, Clone)]
pub struct CacheEntryInfo {
    pub key: String,
    pub tier: CacheTier,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntryInfo {
    fn from_stored(key: String, tier: CacheTier, entry: &StoredEntry) -> Self {
        Self {
            key,
            tier,
            cached_at: millis_to_datetime(entry.cached_at),
            expires_at: millis_to_datetime(entry.expires_at),
        }
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

/// Process-wide query cache shared by every repository.
///
/// Reads and writes never fail from the caller's point of view: tier faults
/// are logged and degrade to a miss or a skipped write.
pub struct CacheManager {
    memory: Mutex<MemoryTier>,
    persistent: Option<Mutex<PersistentTier>>,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    /// A cache with only the memory tier. Persistent-tier operations are
    /// logged and treated as misses.
    pub fn in_memory() -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new()),
            persistent: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// A cache with both tiers; the persistent tier lives in `cache_dir`.
    pub fn new(cache_dir: &Path, persistent_quota_bytes: usize) -> Result<Self> {
        let persistent = PersistentTier::open(cache_dir, persistent_quota_bytes)
            .with_context(|| format!("Failed to open persistent cache in {}", cache_dir.display()))?;
        info!(path = %persistent.path().display(), "Persistent cache ready");

        Ok(Self {
            memory: Mutex::new(MemoryTier::new()),
            persistent: Some(Mutex::new(persistent)),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn has_tier(&self, tier: CacheTier) -> bool {
        match tier {
            CacheTier::Memory => true,
            CacheTier::Persistent => self.persistent.is_some(),
        }
    }

    fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
        // A panic while holding the lock cannot leave a tier half-written in a
        // way that matters for a cache, so poisoning is ignored.
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against a tier's store, or return `None` if the tier is not
    /// configured.
    fn with_tier<R>(&self, tier: CacheTier, f: impl FnOnce(&mut dyn TierStore) -> R) -> Option<R> {
        match tier {
            CacheTier::Memory => Some(f(&mut *Self::lock(&self.memory))),
            CacheTier::Persistent => match &self.persistent {
                Some(persistent) => Some(f(&mut *Self::lock(persistent))),
                None => {
                    warn!(tier = %tier, "Cache tier not configured, treating as miss");
                    None
                }
            },
        }
    }

    fn configured_tiers(&self) -> impl Iterator<Item = CacheTier> + '_ {
        CacheTier::ALL.into_iter().filter(|t| self.has_tier(*t))
    }

    /// Look up a live entry and decode it as `T`.
    ///
    /// Expired, corrupt and undecodable entries are removed and reported as
    /// a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey, tier: CacheTier) -> Option<T> {
        let now = self.clock.now_millis();

        self.with_tier(tier, |store| {
            let entry = match store.get(key) {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Cache read failed");
                    return None;
                }
            };

            if entry.is_expired(now) {
                debug!(key = %key, tier = %tier, "Cache entry expired");
                if let Err(e) = store.remove(key) {
                    warn!(key = %key, tier = %tier, error = %e, "Failed to remove expired entry");
                }
                return None;
            }

            match serde_json::from_value::<T>(entry.value) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Dropping undecodable cache entry");
                    if let Err(e) = store.remove(key) {
                        warn!(key = %key, tier = %tier, error = %e, "Failed to remove undecodable entry");
                    }
                    None
                }
            }
        })
        .flatten()
    }

    /// Store `value` under `key` for `ttl`. Best-effort.
    ///
    /// A quota failure sweeps expired entries from the tier and retries once.
    pub fn set<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Duration, tier: CacheTier) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize value for cache");
                return;
            }
        };

        let now = self.clock.now_millis();
        let entry = StoredEntry {
            value,
            expires_at: now.saturating_add(ttl_millis(ttl)),
            cached_at: now,
        };

        self.with_tier(tier, |store| {
            let err = match store.put(key, entry.clone()) {
                Ok(()) => return,
                Err(e) => e,
            };

            if !err.is_quota() {
                warn!(key = %key, tier = %tier, error = %err, "Cache write failed");
                return;
            }

            match store.sweep(now) {
                Ok(swept) => debug!(tier = %tier, swept, "Swept expired entries after quota failure"),
                Err(e) => warn!(tier = %tier, error = %e, "Sweep after quota failure failed"),
            }

            if let Err(e) = store.put(key, entry) {
                warn!(key = %key, tier = %tier, error = %e, "Cache write failed after eviction, skipping");
            }
        });
    }

    /// Remove every entry matching `pattern` from every tier.
    pub fn invalidate(&self, pattern: &KeyPattern) -> usize {
        let mut removed = 0;
        for tier in self.configured_tiers() {
            match self.with_tier(tier, |store| store.remove_matching(pattern)) {
                Some(Ok(n)) => removed += n,
                Some(Err(e)) => warn!(pattern = %pattern, tier = %tier, error = %e, "Cache invalidation failed"),
                None => {}
            }
        }
        debug!(pattern = %pattern, removed, "Invalidated cache entries");
        removed
    }

    /// Empty the selected tier(s).
    pub fn clear(&self, selection: impl Into<TierSelection>) {
        let tiers: Vec<CacheTier> = match selection.into() {
            TierSelection::One(tier) => vec![tier],
            TierSelection::All => self.configured_tiers().collect(),
        };

        for tier in tiers {
            if let Some(Err(e)) = self.with_tier(tier, |store| store.clear()) {
                warn!(tier = %tier, error = %e, "Failed to clear cache tier");
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: Self::lock(&self.memory).len(),
            persistent: self
                .persistent
                .as_ref()
                .map(|p| Self::lock(p).len())
                .unwrap_or(0),
            persistent_enabled: self.persistent.is_some(),
        }
    }

    /// Remove expired entries from one tier. Returns how many were removed.
    pub fn sweep_tier(&self, tier: CacheTier) -> usize {
        let now = self.clock.now_millis();
        match self.with_tier(tier, |store| store.sweep(now)) {
            Some(Ok(removed)) => removed,
            Some(Err(e)) => {
                warn!(tier = %tier, error = %e, "Cache sweep failed");
                0
            }
            None => 0,
        }
    }

    /// Remove expired entries from the memory tier.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_tier(CacheTier::Memory)
    }

    /// Diagnostic listing of live and expired entries in a tier.
    pub fn entries(&self, tier: CacheTier) -> Vec<CacheEntryInfo> {
        let mut entries: Vec<CacheEntryInfo> = self
            .with_tier(tier, |store| store.snapshot())
            .unwrap_or_default()
            .into_iter()
            .map(|(key, entry)| CacheEntryInfo::from_stored(key, tier, &entry))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    pub fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.clock.now_millis())
    }

    /// Start the periodic memory-tier sweep on the current tokio runtime.
    ///
    /// The task holds a weak reference and exits once the manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    debug!("Cache manager dropped, stopping sweeper");
                    break;
                };
                let removed = manager.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::tier::DEFAULT_PERSISTENT_QUOTA_BYTES;
    use serde_json::{json, Value};

    const FIVE_MINUTES: Duration = Duration::from_millis(300_000);

    fn manual_cache() -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = CacheManager::in_memory().with_clock(clock.clone());
        (cache, clock)
    }

    fn both_tiers(dir: &Path, quota: usize) -> (CacheManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = CacheManager::new(dir, quota).unwrap().with_clock(clock.clone());
        (cache, clock)
    }

    fn key(collection: &str) -> CacheKey {
        CacheKey::new(collection, "findAll", &json!({}))
    }

    #[test]
    fn test_ttl_expiry_scenario() {
        let (cache, clock) = manual_cache();
        let k = key("programmes");
        cache.set(&k, &vec!["P1", "P2"], FIVE_MINUTES, CacheTier::Memory);

        let got: Option<Vec<String>> = cache.get(&k, CacheTier::Memory);
        assert_eq!(got, Some(vec!["P1".to_string(), "P2".to_string()]));

        clock.advance_millis(299_999);
        assert!(cache.get::<Vec<String>>(&k, CacheTier::Memory).is_some());

        // At exactly expiresAt the entry is dead and removed on read
        clock.advance_millis(1);
        assert!(cache.get::<Vec<String>>(&k, CacheTier::Memory).is_none());
        assert_eq!(cache.stats().memory, 0);
    }

    #[test]
    fn test_get_absent_key() {
        let (cache, _) = manual_cache();
        assert!(cache.get::<Value>(&key("nothing"), CacheTier::Memory).is_none());
    }

    #[test]
    fn test_undecodable_entry_is_dropped() {
        let (cache, _) = manual_cache();
        let k = key("programmes");
        cache.set(&k, &json!({"unexpected": "shape"}), FIVE_MINUTES, CacheTier::Memory);

        assert!(cache.get::<Vec<i64>>(&k, CacheTier::Memory).is_none());
        assert_eq!(cache.stats().memory, 0);
    }

    #[test]
    fn test_persistent_tier_without_directory_is_a_miss() {
        let (cache, _) = manual_cache();
        let k = key("programmes");
        cache.set(&k, &1, FIVE_MINUTES, CacheTier::Persistent);
        assert!(cache.get::<i32>(&k, CacheTier::Persistent).is_none());
        assert!(!cache.stats().persistent_enabled);
    }

    #[test]
    fn test_invalidate_spans_tiers_and_spares_other_collections() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = both_tiers(dir.path(), DEFAULT_PERSISTENT_QUOTA_BYTES);

        let orders_all = key("orders");
        let orders_one = CacheKey::new("orders", "findById", &json!({"id": "1"}));
        let mentors = key("mentors");
        cache.set(&orders_all, &1, FIVE_MINUTES, CacheTier::Memory);
        cache.set(&orders_one, &2, FIVE_MINUTES, CacheTier::Persistent);
        cache.set(&mentors, &3, FIVE_MINUTES, CacheTier::Memory);
        cache.set(&mentors, &4, FIVE_MINUTES, CacheTier::Persistent);

        assert_eq!(cache.invalidate(&KeyPattern::parse("orders:*")), 2);

        assert!(cache.get::<i32>(&orders_all, CacheTier::Memory).is_none());
        assert!(cache.get::<i32>(&orders_one, CacheTier::Persistent).is_none());
        assert_eq!(cache.get::<i32>(&mentors, CacheTier::Memory), Some(3));
        assert_eq!(cache.get::<i32>(&mentors, CacheTier::Persistent), Some(4));
    }

    #[test]
    fn test_invalidate_removes_unexpired_entries() {
        let (cache, _) = manual_cache();
        cache.set(&key("orders"), &1, Duration::from_secs(86_400), CacheTier::Memory);
        cache.invalidate(&KeyPattern::collection("orders"));
        assert_eq!(cache.stats().memory, 0);
    }

    #[test]
    fn test_clear_selection() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = both_tiers(dir.path(), DEFAULT_PERSISTENT_QUOTA_BYTES);
        cache.set(&key("a"), &1, FIVE_MINUTES, CacheTier::Memory);
        cache.set(&key("a"), &1, FIVE_MINUTES, CacheTier::Persistent);

        cache.clear(CacheTier::Memory);
        assert_eq!(cache.stats().memory, 0);
        assert_eq!(cache.stats().persistent, 1);

        cache.clear(TierSelection::All);
        assert_eq!(cache.stats().total(), 0);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let (cache, clock) = manual_cache();
        cache.set(&key("a"), &1, Duration::from_millis(10), CacheTier::Memory);
        cache.set(&key("b"), &2, FIVE_MINUTES, CacheTier::Memory);
        clock.advance_millis(10);

        assert_eq!(cache.sweep_expired(), 1);
        let first: Vec<String> = cache.entries(CacheTier::Memory).into_iter().map(|e| e.key).collect();
        assert_eq!(cache.sweep_expired(), 0);
        let second: Vec<String> = cache.entries(CacheTier::Memory).into_iter().map(|e| e.key).collect();
        assert_eq!(first, second);
        assert_eq!(cache.stats().memory, 1);
    }

    #[test]
    fn test_persistent_set_evicts_expired_on_quota_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, clock) = both_tiers(dir.path(), 400);
        let filler = "x".repeat(150);

        cache.set(&key("old"), &filler, Duration::from_millis(10), CacheTier::Persistent);
        cache.set(&key("keep"), &"small", FIVE_MINUTES, CacheTier::Persistent);
        clock.advance_millis(10);

        // Does not fit until the expired filler is swept
        cache.set(&key("new"), &filler, FIVE_MINUTES, CacheTier::Persistent);
        assert_eq!(cache.get::<String>(&key("new"), CacheTier::Persistent), Some(filler));
        assert_eq!(cache.get::<String>(&key("keep"), CacheTier::Persistent), Some("small".into()));
        assert_eq!(cache.stats().persistent, 2);
    }

    #[test]
    fn test_persistent_set_gives_up_after_one_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = both_tiers(dir.path(), 100);
        let huge = "x".repeat(500);

        cache.set(&key("huge"), &huge, FIVE_MINUTES, CacheTier::Persistent);
        assert!(cache.get::<String>(&key("huge"), CacheTier::Persistent).is_none());
    }

    #[test]
    fn test_corrupt_persistent_entry_is_a_miss_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = both_tiers(dir.path(), DEFAULT_PERSISTENT_QUOTA_BYTES);
        let k = key("programmes");
        if let Some(p) = &cache.persistent {
            CacheManager::lock(p).put_raw(&k, "not an entry").unwrap();
        }
        assert_eq!(cache.stats().persistent, 1);

        assert!(cache.get::<Value>(&k, CacheTier::Persistent).is_none());
        assert_eq!(cache.stats().persistent, 0);
    }

    #[test]
    fn test_persistent_entries_survive_new_manager() {
        let dir = tempfile::tempdir().unwrap();
        let k = key("programmes");
        {
            let (cache, _) = both_tiers(dir.path(), DEFAULT_PERSISTENT_QUOTA_BYTES);
            cache.set(&k, &vec![1, 2], FIVE_MINUTES, CacheTier::Persistent);
        }
        let (cache, _) = both_tiers(dir.path(), DEFAULT_PERSISTENT_QUOTA_BYTES);
        assert_eq!(cache.get::<Vec<i32>>(&k, CacheTier::Persistent), Some(vec![1, 2]));
    }

    #[test]
    fn test_entry_age_display() {
        let (cache, clock) = manual_cache();
        cache.set(&key("a"), &1, Duration::from_secs(86_400 * 7), CacheTier::Memory);
        let info = cache.entries(CacheTier::Memory).remove(0);

        assert_eq!(info.age_display(cache.now()), "just now");
        clock.advance_millis(5 * 60_000);
        assert_eq!(info.age_display(cache.now()), "5m ago");
        clock.advance_millis(85 * 60_000);
        assert_eq!(info.age_display(cache.now()), "2h ago");
        clock.advance_millis(2 * 86_400_000);
        assert_eq!(info.age_display(cache.now()), "2d ago");
        assert!(!info.is_expired(cache.now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweeper_removes_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = Arc::new(CacheManager::in_memory().with_clock(clock.clone()));
        cache.set(&key("a"), &1, Duration::from_millis(5), CacheTier::Memory);
        clock.advance_millis(5);

        let handle = cache.spawn_sweeper(Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.stats().memory, 0);

        drop(cache);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(handle.is_finished());
    }
}
