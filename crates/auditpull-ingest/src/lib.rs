//! auditpull Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental ingestion of administrative audit events from a paginated,
//! cursor-based event API.
//!
//! # Components
//!
//! - **checkpoint**: durable, monotonic record of the last emitted position
//! - **normalize**: recursive cleanup of raw event payloads
//! - **client** / **fetcher**: page requests with layered retry
//! - **engine**: the fetch → normalize → emit → commit loop
//! - **sink**: where normalized events go
//!
//! # Example
//!
//! ```no_run
//! use auditpull_ingest::checkpoint::FileCheckpointStore;
//! use auditpull_ingest::client::EventsClient;
//! use auditpull_ingest::config::IngestConfig;
//! use auditpull_ingest::engine::{IngestionLoop, LoopSettings};
//! use auditpull_ingest::fetcher::BatchFetcher;
//! use auditpull_ingest::session::Session;
//! use auditpull_ingest::sink::JsonLinesSink;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::load()?;
//!     let session = Session::load(&config.credentials)?;
//!
//!     let client =
//!         EventsClient::new(&config.api.base_url, session, config.api.request_timeout)?;
//!     let fetcher = BatchFetcher::new(client, config.retry.backoff());
//!     let store = FileCheckpointStore::new(&config.checkpoint.dir, &config.stream.stream_key)?;
//!
//!     let mut engine = IngestionLoop::new(
//!         fetcher,
//!         store,
//!         JsonLinesSink::stdout(),
//!         LoopSettings::from_config(&config),
//!         CancellationToken::new(),
//!     );
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod client;
pub mod config;
pub mod engine;
pub mod fetcher;
pub mod normalize;
pub mod retry;
pub mod session;
pub mod sink;

// Re-export commonly used types
pub use auditpull_common::types::StreamPosition;
pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use client::{EventPage, EventSource, EventsClient, FetchError, FetchParams, StreamType};
pub use engine::{CycleOutcome, IngestError, IngestionLoop, LoopSettings, LoopState, RunSummary};
pub use fetcher::{Batch, BatchFetcher, EmptyExhaustion};
pub use normalize::{normalize, NormalizedEvent, RawEvent};
pub use sink::{EventSink, JsonLinesSink, MemorySink};
