//! auditpull-ingest - admin log ingestion tool

use anyhow::{Context, Result};
use auditpull_common::logging::{init_logging, LogConfig, LogLevel};
use auditpull_ingest::checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use auditpull_ingest::client::EventsClient;
use auditpull_ingest::config::IngestConfig;
use auditpull_ingest::engine::{IngestionLoop, LoopSettings, RunSummary};
use auditpull_ingest::fetcher::BatchFetcher;
use auditpull_ingest::session::Session;
use auditpull_ingest::sink::JsonLinesSink;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "auditpull-ingest")]
#[command(author, version, about = "Incremental admin log ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the event stream and write normalized events as JSON lines
    Run {
        /// Checkpoint slot to resume from and commit to
        #[arg(long)]
        stream_key: Option<String>,

        /// Events requested per page
        #[arg(long)]
        limit: Option<u32>,

        /// Append events to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Resume from the stored checkpoint but never write it
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or reset a stored checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,

        /// Checkpoint slot to operate on
        #[arg(long, global = true)]
        stream_key: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointAction {
    /// Print the stored position
    Show,
    /// Delete the stored position so the next run starts from the beginning
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("auditpull-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            stream_key,
            limit,
            output,
            dry_run,
        } => {
            if let Some(key) = stream_key {
                config.stream.stream_key = key;
            }
            if let Some(limit) = limit {
                config.stream.page_limit = limit;
            }
            config.validate()?;

            let summary = run(config, output, dry_run).await?;
            info!(
                cycles = summary.cycles,
                events_emitted = summary.events_emitted,
                stream_position = %summary.position,
                "Ingestion complete"
            );
        },
        Command::Checkpoint { action, stream_key } => {
            let key = stream_key.unwrap_or_else(|| config.stream.stream_key.clone());
            let mut store = FileCheckpointStore::new(&config.checkpoint.dir, key)?;

            match action {
                CheckpointAction::Show => {
                    println!("{}", store.load()?);
                },
                CheckpointAction::Reset => {
                    if store.reset()? {
                        info!(path = %store.path().display(), "Checkpoint removed");
                    } else {
                        info!(path = %store.path().display(), "No checkpoint to remove");
                    }
                },
            }
        },
    }

    Ok(())
}

async fn run(config: IngestConfig, output: Option<PathBuf>, dry_run: bool) -> Result<RunSummary> {
    let session = match Session::load(&config.credentials) {
        Ok(session) => {
            info!("Authentication complete");
            session
        },
        Err(e) => {
            error!(error = %e, "Authentication failed");
            return Err(e).context("Authentication failed");
        },
    };

    let client = EventsClient::new(&config.api.base_url, session, config.api.request_timeout)?;
    let fetcher = BatchFetcher::new(client, config.retry.backoff())
        .on_empty_exhausted(config.retry.on_empty_exhausted);
    let settings = LoopSettings::from_config(&config);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let store = FileCheckpointStore::new(&config.checkpoint.dir, &config.stream.stream_key)?;

    if dry_run {
        let start = store.load()?;
        info!(stream_position = %start, "Dry run, checkpoint will not be written");
        let store = MemoryCheckpointStore::starting_at(store.key(), start);
        drive(fetcher, store, output, settings, cancel).await
    } else {
        drive(fetcher, store, output, settings, cancel).await
    }
}

async fn drive<C: CheckpointStore>(
    fetcher: BatchFetcher<EventsClient>,
    store: C,
    output: Option<PathBuf>,
    settings: LoopSettings,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let summary = match output {
        Some(path) => {
            let sink = JsonLinesSink::append(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            IngestionLoop::new(fetcher, store, sink, settings, cancel)
                .run()
                .await?
        },
        None => {
            IngestionLoop::new(fetcher, store, JsonLinesSink::stdout(), settings, cancel)
                .run()
                .await?
        },
    };

    Ok(summary)
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current cycle");
            cancel.cancel();
        }
    });
}
