//! Layered retry behaviour of the batch fetcher
//!
//! All tests run on a paused clock, so multi-minute ceilings finish at once.

mod common;

use auditpull_common::types::StreamPosition;
use auditpull_ingest::client::{FetchError, FetchParams, StreamType};
use auditpull_ingest::fetcher::{BatchFetcher, EmptyExhaustion};
use common::{backoff, page, ScriptedSource};
use serde_json::json;
use std::time::Duration;

fn params() -> FetchParams {
    FetchParams {
        limit: 500,
        stream_type: StreamType::AdminLogs,
        stream_position: StreamPosition::START,
    }
}

fn production_backoff() -> auditpull_ingest::retry::Backoff {
    backoff(Duration::from_secs(1), Duration::from_secs(300))
}

// ============================================================================
// Transport Layer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success() {
    let source = ScriptedSource::new(vec![
        Err(FetchError::timeout("read timed out")),
        Err(FetchError::Status {
            status: 503,
            body: "unavailable".into(),
        }),
        Ok(page(json!([{"event_id": "e1"}]), 42)),
    ]);
    let fetcher = BatchFetcher::new(source, production_backoff());

    let batch = fetcher.fetch(&params()).await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(batch.next_position, Some(StreamPosition::new(42)));
    assert_eq!(fetcher.source().call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_ceiling_ends_fetch() {
    let source = ScriptedSource::with_fallback(vec![], || Err(FetchError::connect("refused")));
    let fetcher = BatchFetcher::new(source, production_backoff());

    let started = tokio::time::Instant::now();
    let err = fetcher.fetch(&params()).await.unwrap_err();

    match err {
        FetchError::RetriesExhausted {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 11);
            assert!(matches!(*source, FetchError::Transport { .. }));
        },
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(started.elapsed(), Duration::from_secs(300));
}

#[tokio::test(start_paused = true)]
async fn test_non_transient_error_is_not_retried() {
    let source = ScriptedSource::new(vec![Err(FetchError::Status {
        status: 400,
        body: "bad stream_position".into(),
    })]);
    let fetcher = BatchFetcher::new(source, production_backoff());

    let err = fetcher.fetch(&params()).await.unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 400, .. }));
    assert_eq!(fetcher.source().call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_is_not_retried() {
    let source = ScriptedSource::new(vec![Err(FetchError::Unauthorized)]);
    let fetcher = BatchFetcher::new(source, production_backoff());

    assert!(matches!(
        fetcher.fetch(&params()).await,
        Err(FetchError::Unauthorized)
    ));
    assert_eq!(fetcher.source().call_count(), 1);
}

// ============================================================================
// Empty-Result Layer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_empty_pages_are_polled_until_events_arrive() {
    let source = ScriptedSource::new(vec![
        Ok(page(json!([]), 0)),
        Ok(page(json!([]), 0)),
        Ok(page(json!([{"event_id": "e1"}, {"event_id": "e2"}]), 7)),
    ]);
    let fetcher = BatchFetcher::new(source, production_backoff());

    let batch = fetcher.fetch(&params()).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(
        fetcher.source().gaps(),
        vec![Duration::from_secs(1), Duration::from_secs(2)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_ceiling_fails_when_configured() {
    let source = ScriptedSource::new(vec![]);
    let fetcher = BatchFetcher::new(source, production_backoff())
        .on_empty_exhausted(EmptyExhaustion::Fail);

    let err = fetcher.fetch(&params()).await.unwrap_err();

    assert!(matches!(err, FetchError::NoNewEvents { attempts: 11, .. }));

    // Delays grow until the cap, the last one truncated to the ceiling
    let gaps: Vec<u64> = fetcher
        .source()
        .gaps()
        .iter()
        .map(Duration::as_secs)
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16, 32, 60, 60, 60, 57]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_ceiling_returns_empty_batch_by_default() {
    let source = ScriptedSource::new(vec![]);
    let fetcher = BatchFetcher::new(
        source,
        backoff(Duration::from_secs(1), Duration::from_secs(10)),
    );

    let batch = fetcher.fetch(&params()).await.unwrap();

    assert!(batch.is_empty());
    assert!(!batch.has_progress());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_restarts_empty_polling() {
    let source = ScriptedSource::new(vec![
        Ok(page(json!([]), 0)),
        Ok(page(json!([]), 0)),
        Err(FetchError::timeout("read timed out")),
        Ok(page(json!([{"event_id": "e1"}]), 3)),
    ]);
    let fetcher = BatchFetcher::new(source, production_backoff());

    let batch = fetcher.fetch(&params()).await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(fetcher.source().call_count(), 4);
    // Inner waits 1s and 2s, then the outer layer backs off 1s
    assert_eq!(
        fetcher.source().gaps(),
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(1)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_every_attempt_uses_the_same_anchor() {
    let source = ScriptedSource::new(vec![
        Err(FetchError::timeout("slow")),
        Ok(page(json!([]), 0)),
        Ok(page(json!([{"event_id": "e1"}]), 99)),
    ]);
    let fetcher = BatchFetcher::new(source, production_backoff());
    let anchored = FetchParams {
        stream_position: StreamPosition::new(41),
        ..params()
    };

    fetcher.fetch(&anchored).await.unwrap();

    let positions: Vec<u64> = fetcher
        .source()
        .params()
        .iter()
        .map(|p| p.stream_position.value())
        .collect();
    assert_eq!(positions, vec![41, 41, 41]);
}
