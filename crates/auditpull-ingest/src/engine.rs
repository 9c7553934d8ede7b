//! Ingestion loop
//!
//! Drives fetch → normalize → emit → commit for one stream:
//!
//! ```text
//! Init ─► Polling ─► Emitting ─► Committing ─┐
//!            ▲                               │
//!            └───────────────────────────────┘
//! any state ─► Cancelled   (checked at the top of each cycle)
//! ```
//!
//! The checkpoint is committed strictly after every event of the batch has
//! been emitted and the sink flushed. A crash in between re-emits the whole
//! batch on restart (at-least-once); nothing is ever committed ahead of
//! emission.

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::client::{EventSource, FetchError, FetchParams, StreamType};
use crate::config::IngestConfig;
use crate::fetcher::BatchFetcher;
use crate::normalize::normalize;
use crate::sink::{EventSink, SinkError};
use auditpull_common::types::StreamPosition;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Polling,
    Emitting,
    Committing,
    Cancelled,
}

/// Per-stream loop settings
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub limit: u32,
    pub stream_type: StreamType,
    /// Pause after a cycle without a forward position; zero re-polls at once
    pub no_progress_delay: Duration,
}

impl LoopSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            limit: config.stream.page_limit,
            stream_type: config.stream.stream_type,
            no_progress_delay: config.stream.no_progress_delay,
        }
    }
}

/// What a single cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Cancelled,
    Completed {
        emitted: usize,
        position: StreamPosition,
        advanced: bool,
    },
}

/// Totals for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub events_emitted: u64,
    pub position: StreamPosition,
}

/// Single-task ingestion loop for one stream
pub struct IngestionLoop<S, C, K> {
    fetcher: BatchFetcher<S>,
    checkpoint: C,
    sink: K,
    settings: LoopSettings,
    cancel: CancellationToken,
    state: LoopState,
    /// Working copy of the checkpoint, loaded once
    position: Option<StreamPosition>,
    cycles: u64,
    events_emitted: u64,
}

impl<S, C, K> IngestionLoop<S, C, K>
where
    S: EventSource,
    C: CheckpointStore,
    K: EventSink,
{
    pub fn new(
        fetcher: BatchFetcher<S>,
        checkpoint: C,
        sink: K,
        settings: LoopSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            checkpoint,
            sink,
            settings,
            cancel,
            state: LoopState::Init,
            position: None,
            cycles: 0,
            events_emitted: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Working position, once loaded
    pub fn position(&self) -> Option<StreamPosition> {
        self.position
    }

    pub fn fetcher(&self) -> &BatchFetcher<S> {
        &self.fetcher
    }

    pub fn checkpoint(&self) -> &C {
        &self.checkpoint
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_parts(self) -> (C, K) {
        (self.checkpoint, self.sink)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            cycles: self.cycles,
            events_emitted: self.events_emitted,
            position: self.position.unwrap_or_default(),
        }
    }

    /// Run until cancelled or until a cycle fails
    ///
    /// Cancellation returns `Ok`; any fetch, sink or checkpoint failure ends
    /// the run with the checkpoint left at the last fully emitted batch.
    pub async fn run(&mut self) -> Result<RunSummary, IngestError> {
        let span = info_span!(
            "ingest_run",
            run_id = %Uuid::new_v4(),
            stream_key = %self.checkpoint.key()
        );

        async {
            loop {
                match self.run_cycle().await? {
                    CycleOutcome::Cancelled => break,
                    CycleOutcome::Completed { advanced: false, .. } => self.idle().await,
                    CycleOutcome::Completed { .. } => {},
                }
            }

            let summary = self.summary();
            info!(
                cycles = summary.cycles,
                events_emitted = summary.events_emitted,
                stream_position = %summary.position,
                "Ingestion stopped"
            );
            Ok::<_, IngestError>(summary)
        }
        .instrument(span)
        .await
    }

    /// Run one fetch/emit/commit cycle
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, IngestError> {
        if self.cancel.is_cancelled() {
            if self.state != LoopState::Cancelled {
                info!("Cancellation requested, stopping before the next fetch");
            }
            self.state = LoopState::Cancelled;
            return Ok(CycleOutcome::Cancelled);
        }

        let position = self.working_position()?;

        self.state = LoopState::Polling;
        let params = FetchParams {
            limit: self.settings.limit,
            stream_type: self.settings.stream_type,
            stream_position: position,
        };

        let batch = match self.fetcher.fetch(&params).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(
                    error = %e,
                    stream_position = %position,
                    "Fetch failed, stopping stream without advancing the checkpoint"
                );
                return Err(e.into());
            },
        };

        self.state = LoopState::Emitting;
        let emitted = batch.events.len();
        for raw in batch.events {
            self.sink.emit(normalize(raw)).await?;
        }
        self.sink.flush().await?;

        self.cycles += 1;
        self.events_emitted += emitted as u64;

        let advanced = match batch.next_position {
            Some(next) if next > position => {
                self.state = LoopState::Committing;
                self.checkpoint.commit(next)?;
                self.position = Some(next);
                true
            },
            Some(next) if next < position => {
                warn!(
                    stream_position = %position,
                    reported = %next,
                    "API reported a position behind the checkpoint, ignoring it"
                );
                false
            },
            _ => false,
        };
        self.state = LoopState::Polling;

        let current = self.position.unwrap_or(position);
        info!(
            count = emitted,
            next_stream_position = %current,
            advanced,
            "Posted"
        );

        Ok(CycleOutcome::Completed {
            emitted,
            position: current,
            advanced,
        })
    }

    fn working_position(&mut self) -> Result<StreamPosition, CheckpointError> {
        if let Some(position) = self.position {
            return Ok(position);
        }

        let position = self.checkpoint.load()?;
        info!(
            stream_key = %self.checkpoint.key(),
            stream_position = %position,
            "Resuming collection"
        );
        self.position = Some(position);
        Ok(position)
    }

    async fn idle(&self) {
        let delay = self.settings.no_progress_delay;
        if delay.is_zero() {
            return;
        }

        debug!(delay_ms = delay.as_millis() as u64, "No forward position, pausing");
        tokio::select! {
            _ = self.cancel.cancelled() => {},
            _ = tokio::time::sleep(delay) => {},
        }
    }
}
