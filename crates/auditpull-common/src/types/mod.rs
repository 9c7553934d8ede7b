//! Common types used across auditpull

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AuditPullError;

/// Cursor into the remote, append-only event history.
///
/// A position means "every event up to and including this point has been
/// durably ingested". [`StreamPosition::START`] (zero) denotes the start of
/// history and is what a fresh checkpoint resolves to.
///
/// # Examples
///
/// ```
/// use auditpull_common::types::StreamPosition;
///
/// let position = StreamPosition::new(42);
/// assert!(position > StreamPosition::START);
/// assert_eq!(position.to_string(), "42");
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StreamPosition(u64);

impl StreamPosition {
    /// The "no prior position" value.
    pub const START: StreamPosition = StreamPosition(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// True when the position points past the start of history.
    pub fn is_forward(self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StreamPosition {
    type Err = AuditPullError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(StreamPosition)
            .map_err(|e| AuditPullError::invalid_position(format!("'{}': {}", s, e)))
    }
}

impl From<u64> for StreamPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Positions as the remote API sends them. Large cursors are frequently
/// encoded as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum WirePosition {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

/// Deserialize a `next_stream_position` marker.
///
/// Yields `None` for an absent, null, zero or negative marker: the API gave
/// no forward-progress signal and the checkpoint must stay where it is.
/// Numeric strings are accepted; any other string is an error.
///
/// Use together with `#[serde(default)]` so a missing field is accepted.
pub fn next_position<'de, D>(deserializer: D) -> std::result::Result<Option<StreamPosition>, D::Error>
where
    D: Deserializer<'de>,
{
    let wire = Option::<WirePosition>::deserialize(deserializer)?;

    let position = match wire {
        None => None,
        Some(WirePosition::Unsigned(n)) => Some(n),
        Some(WirePosition::Signed(n)) => u64::try_from(n).ok(),
        Some(WirePosition::Text(text)) => {
            let text = text.trim();
            if text.is_empty() || text.parse::<i64>().is_ok_and(|n| n <= 0) {
                None
            } else {
                Some(text.parse::<u64>().map_err(|_| {
                    serde::de::Error::custom(format!("invalid stream position '{}'", text))
                })?)
            }
        },
    };

    Ok(position.filter(|n| *n > 0).map(StreamPosition))
}
