use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::EvictionPolicy;
use super::constants::{
    ENV_CACHE_EVICTION_POLICY, ENV_CACHE_MAX_ENTRIES, ENV_CONFIG, ENV_DATABASE_MAX_CONNECTIONS,
    ENV_DATABASE_PATH, ENV_DEBUG, ENV_EVENTS_FLUSH_INTERVAL_MS, ENV_INGEST_BATCH_SIZE,
    ENV_INGEST_FLUSH_INTERVAL_MS, ENV_INGEST_RETRY_ALLOWANCE, ENV_INGEST_RETRY_DELAY_MS,
};

#[derive(Parser)]
#[command(name = "tracefold")]
#[command(version, about = "Span and annotation ingestion engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug mode
    #[arg(long, global = true, env = ENV_DEBUG)]
    pub debug: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Database options
    /// SQLite database file
    #[arg(long, global = true, env = ENV_DATABASE_PATH)]
    pub database_path: Option<PathBuf>,

    /// SQLite connection pool size
    #[arg(long, global = true, env = ENV_DATABASE_MAX_CONNECTIONS)]
    pub database_max_connections: Option<u32>,

    // Ingestion options
    /// Interval between ingestion flushes (milliseconds)
    #[arg(long, global = true, env = ENV_INGEST_FLUSH_INTERVAL_MS)]
    pub ingest_flush_interval_ms: Option<u64>,

    /// Maximum items persisted per transaction
    #[arg(long, global = true, env = ENV_INGEST_BATCH_SIZE)]
    pub ingest_batch_size: Option<usize>,

    /// Delay before a postponed annotation is retried (milliseconds)
    #[arg(long, global = true, env = ENV_INGEST_RETRY_DELAY_MS)]
    pub ingest_retry_delay_ms: Option<u64>,

    /// Number of retries for annotations whose target has not arrived yet
    #[arg(long, global = true, env = ENV_INGEST_RETRY_ALLOWANCE)]
    pub ingest_retry_allowance: Option<u32>,

    /// Interval between DML event handler drains (milliseconds)
    #[arg(long, global = true, env = ENV_EVENTS_FLUSH_INTERVAL_MS)]
    pub events_flush_interval_ms: Option<u64>,

    // Cache options
    /// Maximum number of cache entries
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Cache eviction policy (tinylfu or lru)
    #[arg(long, global = true, env = ENV_CACHE_EVICTION_POLICY, value_parser = parse_eviction_policy)]
    pub cache_eviction_policy: Option<EvictionPolicy>,
}

/// Parse eviction policy from CLI/env string
fn parse_eviction_policy(s: &str) -> Result<EvictionPolicy, String> {
    match s.to_lowercase().as_str() {
        "tinylfu" => Ok(EvictionPolicy::TinyLfu),
        "lru" => Ok(EvictionPolicy::Lru),
        _ => Err(format!(
            "Invalid eviction policy '{}'. Valid options: tinylfu, lru",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Ingest NDJSON records from stdin until EOF or Ctrl+C (default command)
    Start,
    /// Ingest NDJSON records from files, drain every queue, then exit
    Replay {
        /// Files containing one JSON record per line
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub debug: bool,
    pub config: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub database_max_connections: Option<u32>,
    pub ingest_flush_interval_ms: Option<u64>,
    pub ingest_batch_size: Option<usize>,
    pub ingest_retry_delay_ms: Option<u64>,
    pub ingest_retry_allowance: Option<u32>,
    pub events_flush_interval_ms: Option<u64>,
    pub cache_max_entries: Option<u64>,
    pub cache_eviction_policy: Option<EvictionPolicy>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            debug: cli.debug,
            config: cli.config,
            database_path: cli.database_path,
            database_max_connections: cli.database_max_connections,
            ingest_flush_interval_ms: cli.ingest_flush_interval_ms,
            ingest_batch_size: cli.ingest_batch_size,
            ingest_retry_delay_ms: cli.ingest_retry_delay_ms,
            ingest_retry_allowance: cli.ingest_retry_allowance,
            events_flush_interval_ms: cli.events_flush_interval_ms,
            cache_max_entries: cli.cache_max_entries,
            cache_eviction_policy: cli.cache_eviction_policy,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (CliConfig::from(cli), command)
}
