//! Remote event API client
//!
//! [`EventSource`] is the seam between the fetcher and the network: the
//! production implementation is [`EventsClient`], tests substitute scripted
//! sources.

use crate::normalize::RawEvent;
use crate::session::Session;
use async_trait::async_trait;
use auditpull_common::types::{next_position, StreamPosition};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Longest error body kept in a [`FetchError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Which event stream to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    /// Enterprise administrative audit log
    #[default]
    AdminLogs,
    /// Low-latency variant of the admin log stream
    AdminLogsStreaming,
    All,
    Changes,
    Sync,
}

impl StreamType {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamType::AdminLogs => "admin_logs",
            StreamType::AdminLogsStreaming => "admin_logs_streaming",
            StreamType::All => "all",
            StreamType::Changes => "changes",
            StreamType::Sync => "sync",
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StreamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "admin_logs" => Ok(StreamType::AdminLogs),
            "admin_logs_streaming" => Ok(StreamType::AdminLogsStreaming),
            "all" => Ok(StreamType::All),
            "changes" => Ok(StreamType::Changes),
            "sync" => Ok(StreamType::Sync),
            other => Err(format!("unknown stream type '{}'", other)),
        }
    }
}

/// Parameters of one page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchParams {
    pub limit: u32,
    pub stream_type: StreamType,
    pub stream_position: StreamPosition,
}

/// One page as returned by the event API
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EventPage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub entries: Vec<RawEvent>,

    /// `None` when the API gave no forward-progress signal
    #[serde(default, deserialize_with = "next_position")]
    pub next_stream_position: Option<StreamPosition>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<RawEvent>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<RawEvent>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Transport-level failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Timeout => write!(f, "timeout"),
            TransportKind::Connect => write!(f, "connection failure"),
            TransportKind::Other => write!(f, "transport error"),
        }
    }
}

/// Errors raised while fetching a batch
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("{kind} while requesting events: {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("Event API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Event API rejected the session (HTTP 401). Refresh the access token.")]
    Unauthorized,

    #[error("Failed to decode event page: {0}")]
    Decode(String),

    #[error("Gave up after {attempts} attempts over {elapsed:?}: {source}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<FetchError>,
    },

    #[error("No new events after {attempts} polls over {elapsed:?}")]
    NoNewEvents { attempts: u32, elapsed: Duration },
}

impl FetchError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Timeout,
            message: message.into(),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::Transport {
            kind: TransportKind::Connect,
            message: message.into(),
        }
    }

    /// Whether the failure is worth retrying
    ///
    /// Timeouts and connection failures are, as are throttling (429) and
    /// server-side (5xx) responses.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { kind, .. } => {
                matches!(kind, TransportKind::Timeout | TransportKind::Connect)
            },
            FetchError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else if err.is_decode() {
            return FetchError::Decode(err.to_string());
        } else {
            TransportKind::Other
        };

        FetchError::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// Source of event pages
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Issue exactly one page request
    async fn get_events(&self, params: &FetchParams) -> Result<EventPage, FetchError>;
}

/// HTTP client for the `/events` endpoint
pub struct EventsClient {
    client: Client,
    events_url: String,
    session: Session,
}

impl EventsClient {
    /// Create a client; `request_timeout` bounds each individual attempt
    pub fn new(
        base_url: &str,
        session: Session,
        request_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("auditpull/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            events_url: format!("{}/events", base_url.trim_end_matches('/')),
            session,
        })
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }
}

#[async_trait]
impl EventSource for EventsClient {
    async fn get_events(&self, params: &FetchParams) -> Result<EventPage, FetchError> {
        debug!(
            stream_position = %params.stream_position,
            limit = params.limit,
            stream_type = %params.stream_type,
            "Requesting events"
        );

        let response = self
            .client
            .get(&self.events_url)
            .bearer_auth(self.session.access_token())
            .query(&[
                ("limit", params.limit.to_string()),
                ("stream_type", params.stream_type.as_str().to_string()),
                ("stream_position", params.stream_position.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }

        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
