//! Shared helpers for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use auditpull_common::types::StreamPosition;
use auditpull_ingest::client::{EventPage, EventSource, FetchError, FetchParams};
use auditpull_ingest::retry::Backoff;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

type Fallback = Box<dyn Fn() -> Result<EventPage, FetchError> + Send + Sync>;

/// Event source that replays a fixed script, then a fallback forever
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<EventPage, FetchError>>>,
    fallback: Fallback,
    calls: Mutex<Vec<(Instant, FetchParams)>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<EventPage, FetchError>>) -> Self {
        Self::with_fallback(script, || Ok(EventPage::default()))
    }

    pub fn with_fallback<F>(script: Vec<Result<EventPage, FetchError>>, fallback: F) -> Self
    where
        F: Fn() -> Result<EventPage, FetchError> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(script.into()),
            fallback: Box::new(fallback),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn params(&self) -> Vec<FetchParams> {
        self.calls.lock().unwrap().iter().map(|(_, p)| *p).collect()
    }

    /// Time between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock().unwrap();
        calls.windows(2).map(|w| w[1].0 - w[0].0).collect()
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn get_events(&self, params: &FetchParams) -> Result<EventPage, FetchError> {
        self.calls.lock().unwrap().push((Instant::now(), *params));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| (self.fallback)())
    }
}

/// Page with the given entries and next position
pub fn page(entries: Value, next: u64) -> EventPage {
    let entries = entries
        .as_array()
        .expect("entries must be an array")
        .iter()
        .map(|e| e.as_object().expect("entry must be an object").clone())
        .collect();

    EventPage {
        entries,
        next_stream_position: Some(next).filter(|n| *n > 0).map(StreamPosition::new),
    }
}

/// Deterministic backoff: no jitter, 60s cap
pub fn backoff(initial: Duration, ceiling: Duration) -> Backoff {
    Backoff {
        initial,
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed: ceiling,
        jitter: false,
    }
}
