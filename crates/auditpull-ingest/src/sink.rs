//! Downstream sinks
//!
//! The engine hands every normalized event to an [`EventSink`], one call per
//! event, in batch order. What the sink does with it afterwards is its own
//! business.

use crate::normalize::NormalizedEvent;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter, Stdout};

/// Errors raised while emitting events
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to write event: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Receiver of normalized events
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: NormalizedEvent) -> Result<(), SinkError>;

    /// Called once the whole batch has been emitted, before the checkpoint
    /// is committed
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Writes one compact JSON object per line
pub struct JsonLinesSink<W> {
    writer: W,
    written: u64,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Number of events written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl JsonLinesSink<BufWriter<Stdout>> {
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(tokio::io::stdout()))
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Append to `path`, creating it if needed
    pub async fn append(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for JsonLinesSink<W> {
    async fn emit(&mut self, event: NormalizedEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Keeps emitted events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Vec<NormalizedEvent>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[NormalizedEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<NormalizedEvent> {
        self.events
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&mut self, event: NormalizedEvent) -> Result<(), SinkError> {
        self.events.push(event);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use serde_json::json;

    fn event(value: serde_json::Value) -> NormalizedEvent {
        normalize(value.as_object().unwrap().clone())
    }

    #[tokio::test]
    async fn test_json_lines_output() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(event(json!({"name": "e1", "note": ""}))).await.unwrap();
        sink.emit(event(json!({"name": "e2", "source": {"id": "9"}}))).await.unwrap();
        sink.flush().await.unwrap();

        assert_eq!(sink.written(), 2);
        let output = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(
            output,
            "{\"name\":\"e1\"}\n{\"name\":\"e2\",\"source\":{\"id\":\"9\"}}\n"
        );
    }

    #[tokio::test]
    async fn test_append_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");

        for name in ["e1", "e2"] {
            let mut sink = JsonLinesSink::append(&path).await.unwrap();
            sink.emit(event(json!({ "name": name }))).await.unwrap();
            sink.flush().await.unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_memory_sink_keeps_order() {
        let mut sink = MemorySink::new();
        for n in 0..3 {
            sink.emit(event(json!({ "n": n }))).await.unwrap();
        }
        let order: Vec<i64> = sink
            .events()
            .iter()
            .map(|e| e.get("n").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
