//! Command implementations.
//!
//! Record commands go through a `Repository<Value>` per collection so they
//! share cache keys and invalidation with typed repositories over the same
//! collection.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use fieldbook_core::cache::{CacheManager, CacheTier, KeyPattern, TierSelection};
use fieldbook_core::models::{self, Entity, FinanceEntry, Programme, COLLECTIONS};
use fieldbook_core::remote::{MemoryStore, Order, RemoteStore};
use fieldbook_core::repository::{FindAllOptions, Repository, WriteOptions};
use fieldbook_core::{Config, RepositoryError};

pub struct CommandContext {
    config: Config,
    store: Arc<dyn RemoteStore>,
    cache: Arc<CacheManager>,
}

impl CommandContext {
    pub fn new(config: Config, store: Arc<dyn RemoteStore>, cache: Arc<CacheManager>) -> Self {
        Self { config, store, cache }
    }

    fn repo(&self, collection: &str) -> Repository<Value> {
        Repository::new(
            collection,
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.config.cache_config_for(collection),
        )
        .with_timeout(self.config.request_timeout())
    }

    fn typed_repo<T: Entity>(&self) -> Repository<T> {
        Repository::for_entity(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.config.cache_config_for(T::COLLECTION),
        )
        .with_timeout(self.config.request_timeout())
    }

    pub async fn list(
        &self,
        collection: &str,
        filters: Vec<(String, Value)>,
        order: Option<&str>,
        page: Option<u64>,
        page_size: u64,
        no_cache: bool,
    ) -> Result<()> {
        let mut options = FindAllOptions::new();
        for (column, value) in filters {
            options = options.filter(column, value);
        }
        if let Some(order) = order {
            options = options.order_by(Order::parse(order));
        }
        if let Some(page) = page {
            options = options.page(page, page_size);
        }
        if no_cache {
            options = options.no_cache();
        }

        let fetched = self.repo(collection).find_all(options).await?;
        print_json(&Value::Array(fetched.data))?;
        report_source(fetched.from_cache);
        Ok(())
    }

    pub async fn get(&self, collection: &str, id: &str, no_cache: bool) -> Result<()> {
        match self.repo(collection).find_by_id(id, !no_cache).await {
            Ok(fetched) => {
                print_json(&fetched.data)?;
                report_source(fetched.from_cache);
                Ok(())
            }
            Err(RepositoryError::NotFound { .. }) => bail!("No record {} in {}", id, collection),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn count(&self, collection: &str, filters: Vec<(String, Value)>) -> Result<()> {
        let filters: Map<String, Value> = filters.into_iter().collect();
        let count = self.repo(collection).count(&filters).await?;
        println!("{}", count);
        Ok(())
    }

    pub async fn create(&self, collection: &str, json: &str) -> Result<()> {
        let data = parse_object(json)?;
        let created = self
            .repo(collection)
            .create(&data, WriteOptions::default())
            .await?;
        print_json(&created)
    }

    pub async fn update(&self, collection: &str, id: &str, json: &str) -> Result<()> {
        let data = parse_object(json)?;
        match self
            .repo(collection)
            .update(id, &data, WriteOptions::default())
            .await
        {
            Ok(updated) => print_json(&updated),
            Err(RepositoryError::NotFound { .. }) => bail!("No record {} in {}", id, collection),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.repo(collection)
            .delete(id, WriteOptions::default())
            .await?;
        println!("Deleted {} from {}", id, collection);
        Ok(())
    }

    /// Count every collection concurrently, then total the finances.
    pub async fn summary(&self) -> Result<()> {
        let counts = join_all(COLLECTIONS.iter().map(|collection| {
            let repo = self.repo(collection);
            async move { (*collection, repo.count(&Map::new()).await) }
        }))
        .await;

        for (collection, result) in counts {
            match result {
                Ok(count) => println!("{:<14} {:>6}", collection, count),
                Err(e) => {
                    warn!(collection, error = %e, "Count failed");
                    println!("{:<14} {:>6}", collection, "?");
                }
            }
        }

        let programmes = self.typed_repo::<Programme>().find_all(FindAllOptions::new()).await?;
        let active = programmes.data.iter().filter(|p| p.is_active()).count();
        println!("{:<14} {:>6}", "active", active);

        let finances = self.typed_repo::<FinanceEntry>().find_all(FindAllOptions::new()).await?;
        println!("{:<14} {:>9.2}", "balance", models::balance(&finances.data));
        Ok(())
    }

    pub fn cache_stats(&self) -> Result<()> {
        let stats = self.cache.stats();
        println!("memory       {:>6}", stats.memory);
        if stats.persistent_enabled {
            println!("persistent   {:>6}", stats.persistent);
        } else {
            println!("persistent   (not configured)");
        }
        println!("total        {:>6}", stats.total());
        Ok(())
    }

    pub fn cache_ls(&self, tier: Option<CacheTier>) -> Result<()> {
        let tiers = match tier {
            Some(tier) => vec![tier],
            None => CacheTier::ALL
                .into_iter()
                .filter(|tier| self.cache.has_tier(*tier))
                .collect(),
        };
        let now = self.cache.now();

        for tier in tiers {
            for entry in self.cache.entries(tier) {
                let state = if entry.is_expired(now) { " (expired)" } else { "" };
                println!(
                    "{:<10} {:>10}  {}{}",
                    entry.tier,
                    entry.age_display(now),
                    entry.key,
                    state
                );
            }
        }
        Ok(())
    }

    pub fn cache_clear(&self, tier: Option<CacheTier>) -> Result<()> {
        match tier {
            Some(tier) => {
                if !self.cache.has_tier(tier) {
                    bail!("Cache tier {} is not configured", tier);
                }
                self.cache.clear(tier);
                println!("Cleared {} cache", tier);
            }
            None => {
                self.cache.clear(TierSelection::All);
                println!("Cleared all caches");
            }
        }
        Ok(())
    }

    pub fn cache_sweep(&self) -> Result<()> {
        let removed: usize = CacheTier::ALL
            .into_iter()
            .filter(|tier| self.cache.has_tier(*tier))
            .map(|tier| self.cache.sweep_tier(tier))
            .sum();
        println!("Removed {} expired entries", removed);
        Ok(())
    }

    pub fn cache_invalidate(&self, pattern: &str) -> Result<()> {
        let pattern = KeyPattern::parse(pattern);
        let removed = self.cache.invalidate(&pattern);
        debug!(pattern = %pattern, removed, "Invalidated from CLI");
        println!("Removed {} entries matching {}", removed, pattern);
        Ok(())
    }
}

fn parse_object(json: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(json).context("Record must be valid JSON")?;
    if !value.is_object() {
        bail!("Record must be a JSON object");
    }
    Ok(value)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_source(from_cache: bool) {
    if from_cache {
        eprintln!("(from cache)");
    }
}

/// Small dataset served by `--offline`.
pub fn demo_store() -> MemoryStore {
    MemoryStore::new()
        .with_rows(
            Programme::COLLECTION,
            vec![
                json!({"id": 1, "nom": "Incubation", "statut": "actif", "date_debut": "2024-09-01", "budget": 12000.0}),
                json!({"id": 2, "nom": "Mentorat jeunes", "statut": "actif", "date_debut": "2024-10-15", "budget": 4500.0}),
                json!({"id": 3, "nom": "Formation numérique", "statut": "clos", "date_debut": "2023-01-10", "date_fin": "2023-12-20"}),
            ],
        )
        .with_rows(
            models::Beneficiary::COLLECTION,
            vec![
                json!({"id": 1, "prenom": "Awa", "nom": "Diallo", "programme_id": 1, "mentor_id": 1}),
                json!({"id": 2, "prenom": "Karim", "nom": "Benali", "programme_id": 2}),
            ],
        )
        .with_rows(
            models::Mentor::COLLECTION,
            vec![json!({"id": 1, "prenom": "Luc", "nom": "Martin", "expertise": ["finance", "marketing"]})],
        )
        .with_rows(
            FinanceEntry::COLLECTION,
            vec![
                json!({"id": 1, "programme_id": 1, "libelle": "Subvention", "montant": 10000.0, "type": "recette", "date": "2024-09-05"}),
                json!({"id": 2, "programme_id": 1, "libelle": "Location salle", "montant": 1200.0, "type": "depense", "date": "2024-10-01"}),
            ],
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_context() -> CommandContext {
        CommandContext::new(
            Config::default(),
            Arc::new(demo_store()),
            Arc::new(CacheManager::in_memory()),
        )
    }

    #[test]
    fn test_demo_rows_decode_as_models() {
        let store = demo_store();
        let programmes: Vec<Programme> =
            serde_json::from_value(Value::Array(store.rows(Programme::COLLECTION))).unwrap();
        assert_eq!(programmes.iter().filter(|p| p.is_active()).count(), 2);
        let finances: Vec<FinanceEntry> =
            serde_json::from_value(Value::Array(store.rows(FinanceEntry::COLLECTION))).unwrap();
        assert_eq!(models::balance(&finances), 8800.0);
    }

    #[test]
    fn test_parse_object_rejects_non_objects() {
        assert!(parse_object(r#"{"nom": "X"}"#).is_ok());
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("not json").is_err());
    }

    #[tokio::test]
    async fn test_list_populates_cache_and_invalidate_clears_it() {
        let ctx = offline_context();
        ctx.list("programmes", vec![], None, None, 25, false).await.unwrap();
        assert_eq!(ctx.cache.stats().memory, 1);

        ctx.cache_invalidate("programmes:*").unwrap();
        assert_eq!(ctx.cache.stats().memory, 0);
    }

    #[tokio::test]
    async fn test_get_missing_record_errors() {
        let ctx = offline_context();
        let err = ctx.get("programmes", "99", false).await.unwrap_err();
        assert!(err.to_string().contains("No record 99"));
    }

    #[tokio::test]
    async fn test_create_invalidates_listing() {
        let ctx = offline_context();
        ctx.list("programmes", vec![], None, None, 25, false).await.unwrap();
        ctx.create("programmes", r#"{"nom": "Nouveau"}"#).await.unwrap();
        assert_eq!(ctx.cache.stats().memory, 0);
    }

    #[test]
    fn test_clear_unconfigured_tier_errors() {
        let ctx = offline_context();
        assert!(ctx.cache_clear(Some(CacheTier::Persistent)).is_err());
        assert!(ctx.cache_clear(None).is_ok());
    }
}
