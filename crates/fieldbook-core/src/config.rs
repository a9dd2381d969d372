//! Application configuration management.
//!
//! This module handles loading and saving the application configuration:
//! the backend location and key, where the cache lives, and how each
//! collection's repository caches its reads.
//!
//! Configuration is stored at `~/.config/fieldbook/config.json`. The
//! backend URL, API key and access token can be overridden from the
//! environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::{CacheTier, DEFAULT_PERSISTENT_QUOTA_BYTES, DEFAULT_SWEEP_INTERVAL};
use crate::remote::rest::REQUEST_TIMEOUT_SECS;
use crate::repository::{CacheConfig, DEFAULT_CACHE_TTL};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldbook";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the backend URL
pub const URL_ENV: &str = "FIELDBOOK_URL";

/// Environment variable overriding the backend API key
pub const API_KEY_ENV: &str = "FIELDBOOK_API_KEY";

/// Environment variable carrying a user access token
pub const TOKEN_ENV: &str = "FIELDBOOK_TOKEN";

/// Cache settings as written in the config file. Unset fields fall back to
/// the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

impl CacheSettings {
    /// Fields set here win over `base`.
    fn layered_over(&self, base: &CacheSettings) -> CacheSettings {
        CacheSettings {
            enabled: self.enabled.or(base.enabled),
            ttl_ms: self.ttl_ms.or(base.ttl_ms),
            tier: self.tier.clone().or_else(|| base.tier.clone()),
        }
    }

    /// Turn file settings into a repository config.
    ///
    /// An unknown tier name disables caching for the collection instead of
    /// failing.
    pub fn resolve(&self, collection: &str) -> CacheConfig {
        let defaults = CacheConfig::default();

        let tier = match self.tier.as_deref() {
            None => defaults.tier,
            Some(name) => match name.parse::<CacheTier>() {
                Ok(tier) => tier,
                Err(e) => {
                    warn!(collection, tier = name, error = %e, "Invalid cache tier, caching disabled");
                    return CacheConfig::disabled();
                }
            },
        };

        CacheConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            ttl: self.ttl_ms.map(Duration::from_millis).unwrap_or(DEFAULT_CACHE_TTL),
            tier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub persistent_quota_bytes: usize,
    pub sweep_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub default_cache: CacheSettings,
    pub collections: BTreeMap<String, CacheSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_key: None,
            access_token: None,
            cache_dir: None,
            persistent_quota_bytes: DEFAULT_PERSISTENT_QUOTA_BYTES,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            default_cache: CacheSettings::default(),
            collections: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Override backend settings from environment variables that are set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV) {
            self.backend_url = Some(url);
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.api_key = Some(key);
        }
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            self.access_token = Some(token);
        }
        self
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Backend URL and API key, or an error naming what is missing.
    pub fn backend(&self) -> Result<(&str, &str)> {
        let url = self
            .backend_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No backend URL configured (set {})", URL_ENV))?;
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No API key configured (set {})", API_KEY_ENV))?;
        Ok((url, key))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Cache config for a collection: its own settings over the defaults.
    pub fn cache_config_for(&self, collection: &str) -> CacheConfig {
        match self.collections.get(collection) {
            Some(settings) => settings.layered_over(&self.default_cache).resolve(collection),
            None => self.default_cache.resolve(collection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.sweep_interval(), DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.cache_config_for("programmes"), CacheConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = Config {
            backend_url: Some("https://example.test".to_string()),
            api_key: Some("anon".to_string()),
            ..Default::default()
        };
        config.collections.insert(
            "finances".to_string(),
            CacheSettings {
                tier: Some("persistent".to_string()),
                ..Default::default()
            },
        );
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.backend().unwrap(), ("https://example.test", "anon"));
        assert_eq!(loaded.cache_config_for("finances").tier, CacheTier::Persistent);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"default_cache": {"ttl_ms": 1000}}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(REQUEST_TIMEOUT_SECS));
        assert_eq!(config.cache_config_for("mentors").ttl, Duration::from_millis(1000));
    }

    #[test]
    fn test_collection_settings_layer_over_defaults() {
        let mut config = Config {
            default_cache: CacheSettings {
                enabled: Some(true),
                ttl_ms: Some(60_000),
                tier: Some("persistent".to_string()),
            },
            ..Default::default()
        };
        config.collections.insert(
            "finances".to_string(),
            CacheSettings {
                ttl_ms: Some(5_000),
                ..Default::default()
            },
        );

        let finances = config.cache_config_for("finances");
        assert_eq!(finances.ttl, Duration::from_millis(5_000));
        assert_eq!(finances.tier, CacheTier::Persistent);
        assert!(finances.enabled);
    }

    #[test]
    fn test_unknown_tier_disables_caching() {
        let settings = CacheSettings {
            tier: Some("indexedDB".to_string()),
            ..Default::default()
        };
        assert!(!settings.resolve("programmes").enabled);
    }

    #[test]
    fn test_backend_requires_url_and_key() {
        let config = Config {
            backend_url: Some("https://example.test".to_string()),
            ..Default::default()
        };
        let err = config.backend().unwrap_err();
        assert!(err.to_string().contains(API_KEY_ENV));
    }
}
