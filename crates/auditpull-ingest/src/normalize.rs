//! Event normalization
//!
//! Turns a raw audit event into its canonical shape:
//!
//! - null values, empty strings, the `None`/`none` placeholders, empty
//!   objects and empty arrays are dropped
//! - trailing newlines are stripped from strings
//! - strings holding a serialized JSON object are decoded and normalized in
//!   place of the string
//! - nested objects are normalized recursively; arrays are kept as-is
//!
//! The output is built as a fresh map, so key order follows the input.

use serde::Serialize;
use serde_json::{Map, Value};

/// An event exactly as the remote API returned it.
pub type RawEvent = Map<String, Value>;

/// Strings that stand for "no value" in upstream payloads.
const NO_VALUE_TOKENS: [&str; 2] = ["None", "none"];

/// Prefix that marks a string as a serialized JSON object.
const OBJECT_MARKER: &str = "{\"";

/// An event that has been through [`normalize`].
///
/// Contains no null or empty values at any depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NormalizedEvent(Map<String, Value>);

impl NormalizedEvent {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<NormalizedEvent> for Value {
    fn from(event: NormalizedEvent) -> Self {
        Value::Object(event.0)
    }
}

/// Normalize a raw event.
///
/// Decode failures on embedded objects are not errors: the string is kept.
///
/// # Example
///
/// ```
/// use auditpull_ingest::normalize::normalize;
/// use serde_json::json;
///
/// let raw = json!({"a": "{\"b\": null, \"c\": \"1\"}", "note": ""});
/// let event = normalize(raw.as_object().unwrap().clone());
///
/// assert_eq!(serde_json::Value::from(event), json!({"a": {"c": "1"}}));
/// ```
pub fn normalize(raw: RawEvent) -> NormalizedEvent {
    NormalizedEvent(clean_map(raw))
}

fn clean_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .filter_map(|(key, value)| clean_value(value).map(|value| (key, value)))
        .collect()
}

fn clean_value(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(text) => clean_string(text),
        Value::Object(map) => non_empty(clean_map(map)),
        Value::Array(items) if items.is_empty() => None,
        other => Some(other),
    }
}

fn clean_string(mut text: String) -> Option<Value> {
    // Strip before the emptiness checks so a second pass has nothing to do.
    let len = text.trim_end_matches('\n').len();
    text.truncate(len);

    if text.is_empty() || NO_VALUE_TOKENS.contains(&text.as_str()) {
        return None;
    }

    if text.starts_with(OBJECT_MARKER) {
        if let Ok(decoded) = serde_json::from_str::<Map<String, Value>>(&text) {
            return non_empty(clean_map(decoded));
        }
    }

    Some(Value::String(text))
}

fn non_empty(map: Map<String, Value>) -> Option<Value> {
    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}
