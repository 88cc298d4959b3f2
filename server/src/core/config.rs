use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_EVENTS_FLUSH_INTERVAL_MS,
    DEFAULT_INGEST_BATCH_SIZE, DEFAULT_INGEST_FLUSH_INTERVAL_MS, DEFAULT_INGEST_RETRY_ALLOWANCE,
    DEFAULT_INGEST_RETRY_DELAY_MS, SQLITE_MAX_CONNECTIONS,
};

// =============================================================================
// Eviction Policy Enum
// =============================================================================

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// TinyLFU - LRU eviction + LFU admission (near-optimal hit ratio)
    #[default]
    TinyLfu,
    /// Simple LRU (better for recency-biased workloads)
    Lru,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::TinyLfu => write!(f, "tinylfu"),
            EvictionPolicy::Lru => write!(f, "lru"),
        }
    }
}

// =============================================================================
// File Config (JSON, every field optional)
// =============================================================================

#[derive(Debug, Default, Clone, Deserialize)]
pub struct DatabaseFileConfig {
    pub path: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct IngestFileConfig {
    pub flush_interval_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub retry_allowance: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct EventsFileConfig {
    pub flush_interval_ms: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub max_entries: Option<u64>,
    pub eviction_policy: Option<EvictionPolicy>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub database: Option<DatabaseFileConfig>,
    pub ingest: Option<IngestFileConfig>,
    pub events: Option<EventsFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub debug: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(database) = other.database {
            let current = self
                .database
                .get_or_insert_with(DatabaseFileConfig::default);
            if database.path.is_some() {
                tracing::trace!(path = ?database.path, "Merging database.path");
                current.path = database.path;
            }
            if database.max_connections.is_some() {
                current.max_connections = database.max_connections;
            }
        }

        if let Some(ingest) = other.ingest {
            let current = self.ingest.get_or_insert_with(IngestFileConfig::default);
            if ingest.flush_interval_ms.is_some() {
                tracing::trace!(flush_interval_ms = ?ingest.flush_interval_ms, "Merging ingest.flush_interval_ms");
                current.flush_interval_ms = ingest.flush_interval_ms;
            }
            if ingest.batch_size.is_some() {
                tracing::trace!(batch_size = ?ingest.batch_size, "Merging ingest.batch_size");
                current.batch_size = ingest.batch_size;
            }
            if ingest.retry_delay_ms.is_some() {
                current.retry_delay_ms = ingest.retry_delay_ms;
            }
            if ingest.retry_allowance.is_some() {
                current.retry_allowance = ingest.retry_allowance;
            }
        }

        if let Some(events) = other.events {
            let current = self.events.get_or_insert_with(EventsFileConfig::default);
            if events.flush_interval_ms.is_some() {
                current.flush_interval_ms = events.flush_interval_ms;
            }
        }

        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            if cache.max_entries.is_some() {
                current.max_entries = cache.max_entries;
            }
            if cache.eviction_policy.is_some() {
                current.eviction_policy = cache.eviction_policy;
            }
        }

        if other.debug.is_some() {
            self.debug = other.debug;
        }
    }
}

// =============================================================================
// Resolved Config
// =============================================================================

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Explicit database file. `None` means `<data dir>/sqlite/tracefold.db`.
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

/// Settings shared by the span/evaluation flushers and the annotation queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub retry_delay: Duration,
    pub retry_allowance: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_INGEST_FLUSH_INTERVAL_MS),
            batch_size: DEFAULT_INGEST_BATCH_SIZE,
            retry_delay: Duration::from_millis(DEFAULT_INGEST_RETRY_DELAY_MS),
            retry_allowance: DEFAULT_INGEST_RETRY_ALLOWANCE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventsConfig {
    pub flush_interval: Duration,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(DEFAULT_EVENTS_FLUSH_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub eviction_policy: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub events: EventsConfig,
    pub cache: CacheConfig,
    pub debug: bool,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.tracefold/tracefold.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        Self::resolve(cli, file_config)
    }

    /// Layer CLI/env overrides on top of a merged file config and apply defaults
    fn resolve(cli: &CliConfig, file_config: FileConfig) -> Result<Self> {
        let file_database = file_config.database.unwrap_or_default();
        let file_ingest = file_config.ingest.unwrap_or_default();
        let file_events = file_config.events.unwrap_or_default();
        let file_cache = file_config.cache.unwrap_or_default();

        let database = DatabaseConfig {
            path: cli
                .database_path
                .clone()
                .or_else(|| file_database.path.map(|p| expand_path(&p))),
            max_connections: cli
                .database_max_connections
                .or(file_database.max_connections)
                .unwrap_or(SQLITE_MAX_CONNECTIONS),
        };

        let ingest = IngestConfig {
            flush_interval: Duration::from_millis(
                cli.ingest_flush_interval_ms
                    .or(file_ingest.flush_interval_ms)
                    .unwrap_or(DEFAULT_INGEST_FLUSH_INTERVAL_MS),
            ),
            batch_size: cli
                .ingest_batch_size
                .or(file_ingest.batch_size)
                .unwrap_or(DEFAULT_INGEST_BATCH_SIZE),
            retry_delay: Duration::from_millis(
                cli.ingest_retry_delay_ms
                    .or(file_ingest.retry_delay_ms)
                    .unwrap_or(DEFAULT_INGEST_RETRY_DELAY_MS),
            ),
            retry_allowance: cli
                .ingest_retry_allowance
                .or(file_ingest.retry_allowance)
                .unwrap_or(DEFAULT_INGEST_RETRY_ALLOWANCE),
        };

        let events = EventsConfig {
            flush_interval: Duration::from_millis(
                cli.events_flush_interval_ms
                    .or(file_events.flush_interval_ms)
                    .unwrap_or(DEFAULT_EVENTS_FLUSH_INTERVAL_MS),
            ),
        };

        let cache = CacheConfig {
            max_entries: cli
                .cache_max_entries
                .or(file_cache.max_entries)
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            eviction_policy: cli
                .cache_eviction_policy
                .or(file_cache.eviction_policy)
                .unwrap_or_default(),
        };

        let debug = cli.debug || file_config.debug.unwrap_or(false);

        let config = Self {
            database,
            ingest,
            events,
            cache,
            debug,
        };
        config.validate()?;

        tracing::debug!(
            flush_interval_ms = config.ingest.flush_interval.as_millis() as u64,
            batch_size = config.ingest.batch_size,
            retry_allowance = config.ingest.retry_allowance,
            "Configuration resolved"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ingest.batch_size == 0 {
            anyhow::bail!("ingest.batch_size must be greater than zero");
        }
        if self.ingest.flush_interval.is_zero() {
            anyhow::bail!("ingest.flush_interval_ms must be greater than zero");
        }
        if self.events.flush_interval.is_zero() {
            anyhow::bail!("events.flush_interval_ms must be greater than zero");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be greater than zero");
        }
        Ok(())
    }
}

/// Profile config path: ~/.tracefold/tracefold.json
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
