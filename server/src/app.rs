//! Core application

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::core::cli::{self, CliConfig, Commands};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::core::storage::AppStorage;
use crate::data::{CacheService, SqliteService};
use crate::domain::ingest::{IngestRecord, IngestionEngine};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub storage: AppStorage,
    pub database: Arc<SqliteService>,
    pub cache: Arc<CacheService>,
    pub engine: Arc<IngestionEngine>,
}

/// Counts for one input stream
#[derive(Debug, Default, Clone, Copy)]
struct LineStats {
    accepted: usize,
    skipped: usize,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let (cli_config, command) = cli::parse();
        tracing::trace!(command = ?command, "Parsed command");

        let app = Self::init(&cli_config).await?;
        match command {
            Some(Commands::Replay { files }) => app.replay(files).await,
            Some(Commands::Start) | None => app.serve_stdin().await,
        }
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let storage = AppStorage::init(&config).await?;

        let db_path = storage.database_path(&config);
        let database = Arc::new(
            SqliteService::init(&db_path, config.database.max_connections)
                .await
                .with_context(|| format!("Failed to open database: {}", db_path.display()))?,
        );

        let cache = Arc::new(CacheService::new(&config.cache));
        tracing::debug!(backend = cache.backend_name(), "Cache initialized");

        let engine = Arc::new(IngestionEngine::new(
            database.clone(),
            cache.clone(),
            &config,
        ));
        let shutdown = ShutdownService::new(database.clone());

        Ok(Self {
            shutdown,
            config,
            storage,
            database,
            cache,
            engine,
        })
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .with_writer(std::io::stderr)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    pub async fn start_background_tasks(&self) {
        self.shutdown
            .register(
                self.database
                    .start_checkpoint_task(self.shutdown.subscribe()),
            )
            .await;

        self.shutdown
            .register(self.engine.start(self.shutdown.subscribe()))
            .await;

        tracing::debug!("Background tasks started");
    }

    /// Ingest records from stdin until EOF or a shutdown signal
    async fn serve_stdin(self) -> Result<()> {
        self.shutdown.install_signal_handlers();
        self.start_background_tasks().await;

        tracing::info!(
            data_dir = %self.storage.data_dir().display(),
            "Reading records from stdin"
        );

        let mut stats = LineStats::default();
        let reader = BufReader::new(tokio::io::stdin());
        tokio::select! {
            result = ingest_lines(&self.engine, reader, "stdin", &mut stats) => result?,
            _ = self.shutdown.wait() => tracing::debug!("Stopped reading stdin"),
        }

        tracing::info!(
            accepted = stats.accepted,
            skipped = stats.skipped,
            "Input closed, draining queues"
        );
        self.shutdown.shutdown().await;
        Ok(())
    }

    /// Ingest every record from the given files, then drain and exit
    async fn replay(self, files: Vec<PathBuf>) -> Result<()> {
        self.start_background_tasks().await;

        let mut stats = LineStats::default();
        for path in &files {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let source = path.display().to_string();
            ingest_lines(&self.engine, BufReader::new(file), &source, &mut stats).await?;
        }

        self.shutdown.shutdown().await;
        tracing::info!(
            files = files.len(),
            accepted = stats.accepted,
            skipped = stats.skipped,
            "Replay complete"
        );
        Ok(())
    }
}

/// Feed NDJSON lines into the engine; malformed lines are logged and skipped
async fn ingest_lines<R: AsyncBufRead + Unpin>(
    engine: &IngestionEngine,
    reader: R,
    source: &str,
    stats: &mut LineStats,
) -> Result<()> {
    let mut lines = reader.lines();
    let mut line_number = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read {}", source))?
    {
        line_number += 1;
        match IngestRecord::parse_line(&line) {
            Ok(Some(record)) => {
                engine.submit(record);
                stats.accepted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                stats.skipped += 1;
                tracing::warn!(source, line = line_number, error = %e, "Skipping malformed record");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ingest_lines_counts_and_skips() {
        let db = Arc::new(SqliteService::open_in_memory().await.unwrap());
        let config = AppConfig::load(&CliConfig::default()).unwrap();
        let cache = Arc::new(CacheService::new(&config.cache));
        let engine = IngestionEngine::new(db, cache, &config);

        let input = concat!(
            r#"{"type":"trace_annotation","trace_id":"t1","name":"correctness"}"#,
            "\n",
            "\n",
            "{broken\n",
            r#"{"type":"span","span_id":"s1","trace_id":"t1","name":"llm","start_time":"2024-01-01T00:00:00Z","end_time":"2024-01-01T00:00:01Z"}"#,
            "\n",
        );

        let mut stats = LineStats::default();
        ingest_lines(&engine, BufReader::new(input.as_bytes()), "test", &mut stats)
            .await
            .unwrap();
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(engine.pending(), 2);
    }
}
