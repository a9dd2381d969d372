use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::error::RepositoryError;
use super::options::{CacheConfig, Fetched, FindAllOptions, WriteOptions};
use crate::cache::{CacheKey, CacheManager, KeyPattern};
use crate::models::Entity;
use crate::remote::{Filter, RemoteError, RemoteStore, SelectQuery};

const FIND_ALL: &str = "findAll";
const FIND_BY_ID: &str = "findById";

/// Cached access to one remote collection.
///
/// Reads go through the shared [`CacheManager`] under keys derived from the
/// call's parameters. The cache holds the rows exactly as the store returned
/// them, so repositories of different payload types over one collection can
/// share entries. Successful writes invalidate the collection's entries.
/// The repository itself holds no mutable state.
pub struct Repository<T> {
    collection: String,
    store: Arc<dyn RemoteStore>,
    cache: Arc<CacheManager>,
    config: CacheConfig,
    timeout: Option<Duration>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            config: self.config,
            timeout: self.timeout,
            _marker: PhantomData,
        }
    }
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn RemoteStore>,
        cache: Arc<CacheManager>,
        config: CacheConfig,
    ) -> Self {
        let collection = collection.into();
        if config.enabled && !cache.has_tier(config.tier) {
            warn!(
                collection = %collection,
                tier = %config.tier,
                "Repository bound to an unconfigured cache tier, reads will always miss"
            );
        }

        Self {
            collection,
            store,
            cache,
            config,
            timeout: None,
            _marker: PhantomData,
        }
    }

    /// Repository for a domain type's own collection.
    pub fn for_entity(store: Arc<dyn RemoteStore>, cache: Arc<CacheManager>, config: CacheConfig) -> Self
    where
        T: Entity,
    {
        Self::new(T::COLLECTION, store, cache, config)
    }

    /// Bound every remote call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn cache_config(&self) -> CacheConfig {
        self.config
    }

    async fn remote<R>(&self, call: impl Future<Output = Result<R, RemoteError>>) -> Result<R, RemoteError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RemoteError::Timeout(limit))?,
            None => call.await,
        }
    }

    fn key(&self, method: &str, params: &Value) -> CacheKey {
        CacheKey::new(&self.collection, method, params)
    }

    fn cached<V: DeserializeOwned>(&self, key: &CacheKey, use_cache: bool) -> Option<V> {
        if !(use_cache && self.config.enabled) {
            return None;
        }
        let hit = self.cache.get(key, self.config.tier);
        debug!(key = %key, hit = hit.is_some(), "Cache lookup");
        hit
    }

    fn remember<V: Serialize>(&self, key: &CacheKey, value: &V, use_cache: bool) {
        if use_cache && self.config.enabled {
            self.cache.set(key, value, self.config.ttl, self.config.tier);
        }
    }

    fn decode(&self, row: Value) -> Result<T, RepositoryError> {
        serde_json::from_value(row).map_err(|source| RepositoryError::Decode {
            collection: self.collection.clone(),
            source,
        })
    }

    fn decode_rows(&self, rows: Vec<Value>) -> Result<Vec<T>, RepositoryError> {
        rows.into_iter().map(|row| self.decode(row)).collect()
    }

    fn encode(&self, data: &impl Serialize) -> Result<Value, RepositoryError> {
        serde_json::to_value(data).map_err(|source| RepositoryError::Encode {
            collection: self.collection.clone(),
            source,
        })
    }

    fn not_found(&self, id: &str) -> RepositoryError {
        RepositoryError::NotFound {
            collection: self.collection.clone(),
            id: id.to_string(),
        }
    }

    /// Filtered, ordered, paginated listing.
    pub async fn find_all(&self, options: FindAllOptions) -> Result<Fetched<Vec<T>>, RepositoryError> {
        let key = self.key(
            FIND_ALL,
            &json!({
                "filters": options.filters,
                "pagination": options.pagination,
                "orderBy": options.order_by,
            }),
        );

        if let Some(rows) = self.cached::<Vec<Value>>(&key, options.cache) {
            return Ok(Fetched {
                data: self.decode_rows(rows)?,
                from_cache: true,
            });
        }

        let mut query = SelectQuery::from(self.collection.as_str()).filters(Filter::from_map(&options.filters));
        if let Some(order) = options.order_by.clone() {
            query = query.order(order);
        }
        if let Some(page) = options.pagination {
            query = query.range(page.offset(), page.page_size);
        }

        let rows = self.remote(self.store.select(&query)).await?;
        self.remember(&key, &rows, options.cache);

        Ok(Fetched {
            data: self.decode_rows(rows)?,
            from_cache: false,
        })
    }

    /// One record by id. A missing record is [`RepositoryError::NotFound`].
    pub async fn find_by_id(&self, id: &str, use_cache: bool) -> Result<Fetched<T>, RepositoryError> {
        let key = self.key(FIND_BY_ID, &json!({ "id": id }));

        if let Some(row) = self.cached::<Value>(&key, use_cache) {
            return Ok(Fetched {
                data: self.decode(row)?,
                from_cache: true,
            });
        }

        let row = self
            .remote(self.store.select_by_id(&self.collection, id))
            .await?
            .ok_or_else(|| self.not_found(id))?;
        self.remember(&key, &row, use_cache);

        Ok(Fetched {
            data: self.decode(row)?,
            from_cache: false,
        })
    }

    pub async fn create(&self, data: &impl Serialize, options: WriteOptions) -> Result<T, RepositoryError> {
        let record = self.encode(data)?;
        let row = self.remote(self.store.insert(&self.collection, &record)).await?;
        let created = self.decode(row)?;

        if options.invalidate_cache {
            // A new row may belong to any cached listing
            self.cache.invalidate(&KeyPattern::collection(self.collection.as_str()));
        }
        Ok(created)
    }

    pub async fn update(&self, id: &str, data: &impl Serialize, options: WriteOptions) -> Result<T, RepositoryError> {
        let patch = self.encode(data)?;
        let row = match self.remote(self.store.update(&self.collection, id, &patch)).await {
            Ok(row) => row,
            Err(e) if e.is_not_found() => return Err(self.not_found(id)),
            Err(e) => return Err(e.into()),
        };
        let updated = self.decode(row)?;

        if options.invalidate_cache {
            self.invalidate_record(id);
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str, options: WriteOptions) -> Result<(), RepositoryError> {
        self.remote(self.store.delete(&self.collection, id)).await?;

        if options.invalidate_cache {
            self.invalidate_record(id);
        }
        Ok(())
    }

    /// Number of matching records. Never cached.
    pub async fn count(&self, filters: &Map<String, Value>) -> Result<u64, RepositoryError> {
        let filters = Filter::from_map(filters);
        Ok(self.remote(self.store.count(&self.collection, &filters)).await?)
    }

    /// Drop every cached entry of this collection.
    pub fn invalidate_cache(&self) -> usize {
        self.cache.invalidate(&KeyPattern::collection(self.collection.as_str()))
    }

    fn invalidate_record(&self, id: &str) {
        let record = self
            .cache
            .invalidate(&KeyPattern::record(self.collection.as_str(), id));
        // Listings may contain the record; they are dropped wholesale
        let listings = self.invalidate_cache();
        debug!(collection = %self.collection, id, removed = record + listings, "Invalidated after write");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheTier, ManualClock};
    use crate::remote::{MemoryStore, Order};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: i64,
        nom: String,
        #[serde(default)]
        statut: Option<String>,
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        cache: Arc<CacheManager>,
        clock: Arc<ManualClock>,
        repo: Repository<Row>,
    }

    fn fixture(config: CacheConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new().with_rows(
            "programmes",
            vec![
                json!({"id": 1, "nom": "Incubation", "statut": "actif"}),
                json!({"id": 2, "nom": "Acceleration", "statut": "clos"}),
                json!({"id": 3, "nom": "Amorcage", "statut": "actif"}),
            ],
        ));
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let cache = Arc::new(CacheManager::in_memory().with_clock(clock.clone()));
        let repo = Repository::new("programmes", store.clone(), cache.clone(), config);
        Fixture {
            store,
            cache,
            clock,
            repo,
        }
    }

    fn actifs() -> FindAllOptions {
        FindAllOptions::new()
            .filter("statut", "actif")
            .order_by(Order::asc("nom"))
    }

    #[tokio::test]
    async fn test_find_all_miss_then_hit() {
        let f = fixture(CacheConfig::default());

        let first = f.repo.find_all(actifs()).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.data.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);

        let second = f.repo.find_all(actifs()).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.data, first.data);
        assert_eq!(f.store.calls(), 1);
    }

    #[tokio::test]
    async fn test_find_all_key_ignores_filter_insertion_order() {
        let f = fixture(CacheConfig::default());
        let a = FindAllOptions::new().filter("statut", "actif").filter("nom", "Incubation");
        let b = FindAllOptions::new().filter("nom", "Incubation").filter("statut", "actif");

        f.repo.find_all(a).await.unwrap();
        assert!(f.repo.find_all(b).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_find_all_membership_and_pagination() {
        let f = fixture(CacheConfig::default());
        let options = FindAllOptions::new()
            .filter("statut", json!(["actif", "clos"]))
            .order_by(Order::asc("id"))
            .page(2, 2);

        let page = f.repo.find_all(options).await.unwrap();
        assert_eq!(page.data.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_find_all_expires_after_ttl() {
        let f = fixture(CacheConfig::memory(Duration::from_secs(60)));
        f.repo.find_all(actifs()).await.unwrap();

        f.clock.advance_millis(60_000);
        assert!(!f.repo.find_all(actifs()).await.unwrap().from_cache);
        assert_eq!(f.store.calls(), 2);
    }

    #[tokio::test]
    async fn test_per_call_cache_opt_out() {
        let f = fixture(CacheConfig::default());
        f.repo.find_all(actifs().no_cache()).await.unwrap();
        assert_eq!(f.cache.stats().memory, 0);
        assert!(!f.repo.find_all(actifs()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_queries() {
        let f = fixture(CacheConfig::disabled());
        f.repo.find_all(actifs()).await.unwrap();
        f.repo.find_all(actifs()).await.unwrap();
        assert_eq!(f.store.calls(), 2);
        assert_eq!(f.cache.stats().memory, 0);
    }

    #[tokio::test]
    async fn test_remote_failure_is_returned_and_not_cached() {
        let f = fixture(CacheConfig::default());
        f.store.set_offline(true);

        let err = f.repo.find_all(actifs()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Remote(RemoteError::Server(_))));
        assert_eq!(f.cache.stats().memory, 0);
    }

    #[tokio::test]
    async fn test_typed_read_caches_rows_as_returned() {
        let remote = json!({"id": 1, "nom": "Incubation", "statut": "actif", "region": "Dakar", "created_at": "2024-01-01"});
        let store = Arc::new(MemoryStore::new().with_rows("programmes", vec![remote.clone()]));
        let cache = Arc::new(CacheManager::in_memory());
        let typed: Repository<Row> = Repository::new("programmes", store.clone(), cache.clone(), CacheConfig::default());
        let untyped: Repository<Value> = Repository::new("programmes", store.clone(), cache.clone(), CacheConfig::default());

        typed.find_all(FindAllOptions::new()).await.unwrap();
        let listed = untyped.find_all(FindAllOptions::new()).await.unwrap();
        assert!(listed.from_cache);
        assert_eq!(listed.data, vec![remote.clone()]);

        typed.find_by_id("1", true).await.unwrap();
        let one = untyped.find_by_id("1", true).await.unwrap();
        assert!(one.from_cache);
        assert_eq!(one.data, remote);
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn test_find_by_id_not_found_is_distinct() {
        let f = fixture(CacheConfig::default());

        let err = f.repo.find_by_id("99", true).await.unwrap_err();
        assert!(err.is_not_found());

        f.store.set_offline(true);
        let err = f.repo.find_by_id("99", true).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(matches!(err, RepositoryError::Remote(_)));
    }

    #[tokio::test]
    async fn test_find_by_id_is_cached() {
        let f = fixture(CacheConfig::default());
        let first = f.repo.find_by_id("2", true).await.unwrap();
        assert_eq!(first.data.nom, "Acceleration");
        assert!(f.repo.find_by_id("2", true).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_create_invalidates_listings() {
        let f = fixture(CacheConfig::default());
        f.repo.find_all(actifs()).await.unwrap();
        f.repo.find_all(FindAllOptions::new()).await.unwrap();

        let created = f
            .repo
            .create(&json!({"nom": "X", "statut": "actif"}), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(created.id, 4);
        assert_eq!(f.cache.stats().memory, 0);

        let refreshed = f.repo.find_all(actifs()).await.unwrap();
        assert!(!refreshed.from_cache);
        assert_eq!(refreshed.data.len(), 3);
    }

    #[tokio::test]
    async fn test_create_can_keep_cache() {
        let f = fixture(CacheConfig::default());
        f.repo.find_all(actifs()).await.unwrap();
        f.repo
            .create(&json!({"nom": "X", "statut": "actif"}), WriteOptions::keep_cache())
            .await
            .unwrap();
        assert!(f.repo.find_all(actifs()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_update_invalidates_record_and_listings() {
        let f = fixture(CacheConfig::default());
        f.repo.find_by_id("1", true).await.unwrap();
        f.repo.find_all(actifs()).await.unwrap();

        let updated = f
            .repo
            .update("1", &json!({"nom": "Incubation II"}), WriteOptions::default())
            .await
            .unwrap();
        assert_eq!(updated.nom, "Incubation II");

        let fresh = f.repo.find_by_id("1", true).await.unwrap();
        assert!(!fresh.from_cache);
        assert_eq!(fresh.data.nom, "Incubation II");
        assert!(!f.repo.find_all(actifs()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_update_missing_record_is_not_found() {
        let f = fixture(CacheConfig::default());
        let err = f
            .repo
            .update("42", &json!({"nom": "Y"}), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_cache() {
        let f = fixture(CacheConfig::default());
        f.repo.find_all(actifs()).await.unwrap();
        f.store.set_offline(true);

        assert!(f.repo.delete("1", WriteOptions::default()).await.is_err());
        assert_eq!(f.cache.stats().memory, 1);
    }

    #[tokio::test]
    async fn test_delete_invalidates() {
        let f = fixture(CacheConfig::default());
        f.repo.find_by_id("3", true).await.unwrap();
        f.repo.delete("3", WriteOptions::default()).await.unwrap();

        assert!(f.repo.find_by_id("3", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_writes_leave_other_collections_cached() {
        let f = fixture(CacheConfig::default());
        let mentors: Repository<Value> =
            Repository::new("mentors", f.store.clone(), f.cache.clone(), CacheConfig::default());
        mentors.find_all(FindAllOptions::new()).await.unwrap();

        f.repo
            .create(&json!({"nom": "X"}), WriteOptions::default())
            .await
            .unwrap();
        assert!(mentors.find_all(FindAllOptions::new()).await.unwrap().from_cache);
    }

    #[tokio::test]
    async fn test_count_is_never_cached() {
        let f = fixture(CacheConfig::default());
        let filters = actifs().filters;
        assert_eq!(f.repo.count(&filters).await.unwrap(), 2);
        assert_eq!(f.repo.count(&filters).await.unwrap(), 2);
        assert_eq!(f.store.calls(), 2);
        assert_eq!(f.cache.stats().memory, 0);
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let f = fixture(CacheConfig::default());
        f.store
            .insert("programmes", &json!({"id": 10, "nom": 5}))
            .await
            .unwrap();
        let err = f.repo.find_by_id("10", true).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_unconfigured_tier_is_a_miss_not_a_failure() {
        let f = fixture(CacheConfig::persistent(Duration::from_secs(60)));
        assert!(!f.repo.find_all(actifs()).await.unwrap().from_cache);
        assert!(!f.repo.find_all(actifs()).await.unwrap().from_cache);
        assert_eq!(f.repo.cache_config().tier, CacheTier::Persistent);
    }

    struct SlowStore;

    #[async_trait::async_trait]
    impl RemoteStore for SlowStore {
        async fn select(&self, _query: &SelectQuery) -> Result<Vec<Value>, RemoteError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Vec::new())
        }

        async fn select_by_id(&self, _collection: &str, _id: &str) -> Result<Option<Value>, RemoteError> {
            Ok(None)
        }

        async fn insert(&self, _collection: &str, record: &Value) -> Result<Value, RemoteError> {
            Ok(record.clone())
        }

        async fn update(&self, _collection: &str, _id: &str, patch: &Value) -> Result<Value, RemoteError> {
            Ok(patch.clone())
        }

        async fn delete(&self, _collection: &str, _id: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn count(&self, _collection: &str, _filters: &[Filter]) -> Result<u64, RemoteError> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_remote_calls() {
        let cache = Arc::new(CacheManager::in_memory());
        let repo: Repository<Row> = Repository::new("programmes", Arc::new(SlowStore), cache, CacheConfig::default())
            .with_timeout(Duration::from_secs(1));

        let err = repo.find_all(FindAllOptions::new()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Remote(RemoteError::Timeout(_))));
    }
}
