// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Tracefold";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "tracefold";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".tracefold";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "tracefold.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "TRACEFOLD_CONFIG";

// =============================================================================
// Environment Variables - General
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "TRACEFOLD_DEBUG";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "TRACEFOLD_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "TRACEFOLD_DATA_DIR";

// =============================================================================
// Environment Variables - Database
// =============================================================================

/// Environment variable for the SQLite database file path
pub const ENV_DATABASE_PATH: &str = "TRACEFOLD_DATABASE_PATH";

/// Environment variable for the SQLite pool size
pub const ENV_DATABASE_MAX_CONNECTIONS: &str = "TRACEFOLD_DATABASE_MAX_CONNECTIONS";

// =============================================================================
// Environment Variables - Ingestion
// =============================================================================

/// Environment variable for the ingestion flush interval (milliseconds)
pub const ENV_INGEST_FLUSH_INTERVAL_MS: &str = "TRACEFOLD_INGEST_FLUSH_INTERVAL_MS";

/// Environment variable for the ingestion chunk size
pub const ENV_INGEST_BATCH_SIZE: &str = "TRACEFOLD_INGEST_BATCH_SIZE";

/// Environment variable for the annotation retry delay (milliseconds)
pub const ENV_INGEST_RETRY_DELAY_MS: &str = "TRACEFOLD_INGEST_RETRY_DELAY_MS";

/// Environment variable for the annotation retry allowance
pub const ENV_INGEST_RETRY_ALLOWANCE: &str = "TRACEFOLD_INGEST_RETRY_ALLOWANCE";

/// Environment variable for the DML event drain interval (milliseconds)
pub const ENV_EVENTS_FLUSH_INTERVAL_MS: &str = "TRACEFOLD_EVENTS_FLUSH_INTERVAL_MS";

// =============================================================================
// Environment Variables - Cache
// =============================================================================

/// Environment variable for max cache entries
pub const ENV_CACHE_MAX_ENTRIES: &str = "TRACEFOLD_CACHE_MAX_ENTRIES";

/// Environment variable for cache eviction policy
pub const ENV_CACHE_EVICTION_POLICY: &str = "TRACEFOLD_CACHE_EVICTION_POLICY";

// =============================================================================
// SQLite
// =============================================================================

/// SQLite database file name (inside the `sqlite` data subdirectory)
pub const SQLITE_DB_FILENAME: &str = "tracefold.db";

/// Default SQLite connection pool size
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite page cache size (negative = KiB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// Pages between automatic WAL checkpoints
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// Interval between explicit WAL checkpoints
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Ingestion Defaults
// =============================================================================

/// Interval between batch flushes
pub const DEFAULT_INGEST_FLUSH_INTERVAL_MS: u64 = 100;

/// Maximum items persisted in one transaction
pub const DEFAULT_INGEST_BATCH_SIZE: usize = 1000;

/// Delay before a postponed annotation is attempted again
pub const DEFAULT_INGEST_RETRY_DELAY_MS: u64 = 1000;

/// Number of times a postponed annotation is retried before it is discarded
pub const DEFAULT_INGEST_RETRY_ALLOWANCE: u32 = 10;

/// Interval between DML event handler drains
pub const DEFAULT_EVENTS_FLUSH_INTERVAL_MS: u64 = 1000;

// =============================================================================
// Span Attributes
// =============================================================================

/// Attribute path of the caller-supplied session identifier
pub const ATTR_SESSION_ID: &[&str] = &["session", "id"];

/// Attribute path of the prompt token count
pub const ATTR_LLM_TOKEN_COUNT_PROMPT: &[&str] = &["llm", "token_count", "prompt"];

/// Attribute path of the completion token count
pub const ATTR_LLM_TOKEN_COUNT_COMPLETION: &[&str] = &["llm", "token_count", "completion"];

/// Attribute path of the retrieved document list
pub const ATTR_RETRIEVAL_DOCUMENTS: &[&str] = &["retrieval", "documents"];

// =============================================================================
// Cache
// =============================================================================

/// Default maximum cache entries
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Rows per table whose last change time is remembered
pub const LAST_UPDATED_MAX_ROWS_PER_TABLE: u64 = 100_000;

/// Cache key version prefix. Bump to invalidate every cached value.
pub const CACHE_KEY_VERSION: &str = "v1";

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks to drain on shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 300;
