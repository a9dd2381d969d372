//! fieldbook - command-line administration for programmes, beneficiaries,
//! mentors and finances.
//!
//! Every read goes through a cached repository, so repeated listings are
//! served from the local query cache until they expire or a write through
//! this tool invalidates them.

mod commands;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fieldbook_core::cache::{CacheManager, CacheTier};
use fieldbook_core::remote::{RemoteStore, RestClient};
use fieldbook_core::Config;

use commands::CommandContext;

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the cache directory's `logs/` folder
const LOG_FILE_PREFIX: &str = "fieldbook.log";

/// Default page size for `list`
const DEFAULT_PAGE_SIZE: u64 = 25;

#[derive(Parser)]
#[command(name = "fieldbook", version, about = "Administer programmes, beneficiaries, mentors and finances")]
struct Cli {
    /// Use a built-in demo dataset instead of the configured backend
    #[arg(long, global = true)]
    offline: bool,

    /// Path to the config file (defaults to the user config directory)
    #[arg(long, global = true, env = "FIELDBOOK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List records of a collection
    List {
        collection: String,
        /// Filter as column=value; a JSON array value means "one of"
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,
        /// Ordering as column or column.desc
        #[arg(long)]
        order: Option<String>,
        /// 1-based page number
        #[arg(long)]
        page: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u64,
        /// Skip the cache for this read
        #[arg(long)]
        no_cache: bool,
    },
    /// Show one record
    Get {
        collection: String,
        id: String,
        #[arg(long)]
        no_cache: bool,
    },
    /// Count records, always from the backend
    Count {
        collection: String,
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, Value)>,
    },
    /// Insert a record given as a JSON object
    Create { collection: String, json: String },
    /// Patch a record with a JSON object
    Update {
        collection: String,
        id: String,
        json: String,
    },
    /// Delete a record
    Delete { collection: String, id: String },
    /// Record counts for every collection and the finance balance
    Summary,
    /// Inspect or manage the local query cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Entry counts per tier
    Stats,
    /// List cached entries with their age
    Ls {
        #[arg(value_parser = parse_tier)]
        tier: Option<CacheTier>,
    },
    /// Empty one tier, or every tier
    Clear {
        #[arg(value_parser = parse_tier)]
        tier: Option<CacheTier>,
    },
    /// Remove expired entries from every tier
    Sweep,
    /// Remove entries matching a pattern: `programmes:*` for a collection,
    /// `programmes:*:7*` for one record, or a template where `*` matches
    /// anything
    Invalidate { pattern: String },
}

fn parse_filter(s: &str) -> Result<(String, Value), String> {
    let (column, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected column=value, got {}", s))?;
    if column.is_empty() {
        return Err("filter column is empty".to_string());
    }
    // Bare words are strings; anything that parses as JSON keeps its type
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((column.to_string(), value))
}

fn parse_tier(s: &str) -> Result<CacheTier, String> {
    s.parse()
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: &Path) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer().with_writer(io::stderr);

    if std::fs::create_dir_all(log_dir).is_err() {
        tracing_subscriber::registry()
            .with(stderr_layer)
            .with(filter)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(filter)
        .init();
    Some(guard)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    }
    .with_env_overrides();
    Ok(config)
}

/// Open the query cache. Offline runs and an unusable cache directory get a
/// memory-only cache so commands still reach the store.
fn open_cache(cache_dir: &Path, quota_bytes: usize, offline: bool) -> CacheManager {
    if offline {
        // The demo dataset lives only in this process, so nothing is persisted
        return CacheManager::in_memory();
    }
    match CacheManager::new(cache_dir, quota_bytes) {
        Ok(cache) => cache,
        Err(e) => {
            warn!(path = %cache_dir.display(), error = %e, "Persistent cache unavailable, using memory only");
            CacheManager::in_memory()
        }
    }
}

/// Pick the default tier when the config names none.
///
/// Separate invocations only share the persistent tier, so it is preferred
/// whenever the cache has one.
fn apply_default_tier(config: &mut Config, cache: &CacheManager) {
    if config.default_cache.tier.is_none() {
        let tier = if cache.has_tier(CacheTier::Persistent) {
            CacheTier::Persistent
        } else {
            CacheTier::Memory
        };
        config.default_cache.tier = Some(tier.to_string());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    let cache_dir = config.cache_dir()?;

    let _log_guard = init_tracing(&cache_dir.join("logs"));
    info!(offline = cli.offline, "fieldbook starting");

    let store: Arc<dyn RemoteStore> = if cli.offline {
        Arc::new(commands::demo_store())
    } else {
        let (url, key) = config.backend()?;
        let mut client = RestClient::new(url, key, config.request_timeout())
            .context("Failed to build HTTP client")?;
        if let Some(token) = config.access_token.clone() {
            client = client.with_token(token);
        }
        Arc::new(client)
    };

    let cache = open_cache(&cache_dir, config.persistent_quota_bytes, cli.offline);
    apply_default_tier(&mut config, &cache);

    let cache = Arc::new(cache);
    let sweeper = cache.spawn_sweeper(config.sweep_interval());
    let ctx = CommandContext::new(config, store, Arc::clone(&cache));

    let result = match cli.command {
        Command::List {
            collection,
            filters,
            order,
            page,
            page_size,
            no_cache,
        } => ctx.list(&collection, filters, order.as_deref(), page, page_size, no_cache).await,
        Command::Get { collection, id, no_cache } => ctx.get(&collection, &id, no_cache).await,
        Command::Count { collection, filters } => ctx.count(&collection, filters).await,
        Command::Create { collection, json } => ctx.create(&collection, &json).await,
        Command::Update { collection, id, json } => ctx.update(&collection, &id, &json).await,
        Command::Delete { collection, id } => ctx.delete(&collection, &id).await,
        Command::Summary => ctx.summary().await,
        Command::Cache { action } => match action {
            CacheCommand::Stats => ctx.cache_stats(),
            CacheCommand::Ls { tier } => ctx.cache_ls(tier),
            CacheCommand::Clear { tier } => ctx.cache_clear(tier),
            CacheCommand::Sweep => ctx.cache_sweep(),
            CacheCommand::Invalidate { pattern } => ctx.cache_invalidate(&pattern),
        },
    };

    sweeper.abort();
    info!("fieldbook done");
    result
}
