//! Batch fetcher
//!
//! Wraps a single page request in two retry layers:
//!
//! 1. **transport**: timeouts, connection failures, 429 and 5xx responses
//! 2. **empty result**: a page with no entries means the producer has not
//!    caught up yet, so wait and poll again
//!
//! The transport layer is the outer one. A transport failure during empty
//! polling escapes the inner loop, is backed off by the outer loop, and the
//! inner loop starts over.

use crate::client::{EventPage, EventSource, FetchError, FetchParams};
use crate::normalize::RawEvent;
use crate::retry::{Backoff, RetryPolicy};
use auditpull_common::types::StreamPosition;
use std::time::Duration;
use tracing::{info, instrument};

/// What to do when the empty-result ceiling is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyExhaustion {
    /// Hand back the empty batch; the caller polls again
    #[default]
    ReturnEmpty,
    /// Fail the fetch with [`FetchError::NoNewEvents`]
    Fail,
}

impl std::str::FromStr for EmptyExhaustion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "fail" => Ok(EmptyExhaustion::Fail),
            "return-empty" | "empty" => Ok(EmptyExhaustion::ReturnEmpty),
            other => Err(format!("expected 'fail' or 'return-empty', got '{}'", other)),
        }
    }
}

/// One page of events plus where to resume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub events: Vec<RawEvent>,
    /// `None` means the API reported no forward progress
    pub next_position: Option<StreamPosition>,
}

impl Batch {
    /// True when the batch carries a position the checkpoint may advance to
    pub fn has_progress(&self) -> bool {
        self.next_position.is_some_and(StreamPosition::is_forward)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<EventPage> for Batch {
    fn from(page: EventPage) -> Self {
        Self {
            events: page.entries,
            next_position: page.next_stream_position,
        }
    }
}

/// Result of the inner empty-result loop
struct Polled {
    page: EventPage,
    attempts: u32,
    elapsed: Duration,
    exhausted: bool,
}

/// Fetches one batch per call with layered retries
pub struct BatchFetcher<S> {
    source: S,
    transport: RetryPolicy<Polled, FetchError>,
    empty: RetryPolicy<EventPage, FetchError>,
    on_empty_exhausted: EmptyExhaustion,
}

impl<S: EventSource> BatchFetcher<S> {
    /// Use the same backoff shape and ceiling for both layers
    pub fn new(source: S, backoff: Backoff) -> Self {
        Self::with_backoffs(source, backoff.clone(), backoff)
    }

    pub fn with_backoffs(source: S, transport: Backoff, empty: Backoff) -> Self {
        Self {
            source,
            transport: RetryPolicy::new(
                "get_events",
                transport,
                |result: &Result<Polled, FetchError>| matches!(result, Err(e) if e.is_transient()),
            ),
            empty: RetryPolicy::new(
                "get_events",
                empty,
                |result: &Result<EventPage, FetchError>| {
                    matches!(result, Ok(page) if page.entries.is_empty())
                },
            ),
            on_empty_exhausted: EmptyExhaustion::default(),
        }
    }

    pub fn on_empty_exhausted(mut self, policy: EmptyExhaustion) -> Self {
        self.on_empty_exhausted = policy;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch the batch anchored at `params.stream_position`
    ///
    /// Non-transient errors are returned immediately. A transport failure
    /// that outlives the ceiling comes back as
    /// [`FetchError::RetriesExhausted`].
    #[instrument(
        skip(self, params),
        fields(stream_position = %params.stream_position, limit = params.limit)
    )]
    pub async fn fetch(&self, params: &FetchParams) -> Result<Batch, FetchError> {
        let outcome = self.transport.run(|| self.poll_until_non_empty(params)).await;

        match outcome.result {
            Ok(polled) if polled.exhausted => match self.on_empty_exhausted {
                EmptyExhaustion::Fail => Err(FetchError::NoNewEvents {
                    attempts: polled.attempts,
                    elapsed: polled.elapsed,
                }),
                EmptyExhaustion::ReturnEmpty => {
                    info!(
                        attempts = polled.attempts,
                        elapsed_secs = polled.elapsed.as_secs_f64(),
                        "No new events before the retry ceiling, polling again"
                    );
                    Ok(polled.page.into())
                },
            },
            Ok(polled) => Ok(polled.page.into()),
            Err(source) if outcome.exhausted => Err(FetchError::RetriesExhausted {
                attempts: outcome.attempts,
                elapsed: outcome.elapsed,
                source: Box::new(source),
            }),
            Err(e) => Err(e),
        }
    }

    async fn poll_until_non_empty(&self, params: &FetchParams) -> Result<Polled, FetchError> {
        let outcome = self.empty.run(|| self.source.get_events(params)).await;

        outcome.result.map(|page| Polled {
            page,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            exhausted: outcome.exhausted,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_progress() {
        let mut batch = Batch::default();
        assert!(!batch.has_progress());

        batch.next_position = Some(StreamPosition::START);
        assert!(!batch.has_progress());

        batch.next_position = Some(StreamPosition::new(42));
        assert!(batch.has_progress());
    }

    #[test]
    fn test_empty_exhaustion_defaults_to_polling_again() {
        assert_eq!(EmptyExhaustion::default(), EmptyExhaustion::ReturnEmpty);
    }

    #[test]
    fn test_empty_exhaustion_from_str() {
        assert_eq!("fail".parse::<EmptyExhaustion>().unwrap(), EmptyExhaustion::Fail);
        assert_eq!(
            "return_empty".parse::<EmptyExhaustion>().unwrap(),
            EmptyExhaustion::ReturnEmpty
        );
        assert!("retry".parse::<EmptyExhaustion>().is_err());
    }
}
