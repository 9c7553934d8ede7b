//! Checkpoint persistence
//!
//! A checkpoint is the last [`StreamPosition`] whose batch was fully emitted.
//! Stores are single-writer and monotonic: a commit may only move the
//! position forward.

use auditpull_common::types::StreamPosition;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// Errors raised by checkpoint stores
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Invalid stream key '{0}': use letters, digits, '-', '_' or '.', not starting with '.'")]
    InvalidKey(String),

    #[error("Refusing to move checkpoint '{key}' back from {current} to {attempted}")]
    Regression {
        key: String,
        current: StreamPosition,
        attempted: StreamPosition,
    },

    #[error("Checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable record of ingestion progress for one stream
pub trait CheckpointStore {
    /// Stream identity this store is keyed by
    fn key(&self) -> &str;

    /// Last committed position, or [`StreamPosition::START`] if none
    fn load(&self) -> Result<StreamPosition, CheckpointError>;

    /// Replace the stored position
    ///
    /// Moving backwards is rejected with [`CheckpointError::Regression`];
    /// committing the current value is a no-op.
    fn commit(&mut self, position: StreamPosition) -> Result<(), CheckpointError>;
}

fn validate_key(key: &str) -> Result<(), CheckpointError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(CheckpointError::InvalidKey(key.to_string()))
    }
}

fn check_forward(
    key: &str,
    current: StreamPosition,
    attempted: StreamPosition,
) -> Result<bool, CheckpointError> {
    if attempted < current {
        return Err(CheckpointError::Regression {
            key: key.to_string(),
            current,
            attempted,
        });
    }
    Ok(attempted > current)
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument {
    stream_key: String,
    stream_position: StreamPosition,
    updated_at: DateTime<Utc>,
}

/// Checkpoint kept as `<dir>/<key>.json`
///
/// Commits write a temporary file in the same directory, fsync it and
/// rename it over the previous document, so a reader sees either the old
/// or the new position and never a partial write.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    key: String,
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, key: impl Into<String>) -> Result<Self, CheckpointError> {
        let dir = dir.into();
        let key = key.into();
        validate_key(&key)?;

        let path = dir.join(format!("{}.json", key));
        Ok(Self { dir, key, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the slot so the next load starts from the beginning
    ///
    /// Returns whether a checkpoint existed.
    pub fn reset(&mut self) -> Result<bool, CheckpointError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomically(&self, document: &CheckpointDocument) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| self.io_error(e))?;

        let mut file = NamedTempFile::new_in(&self.dir).map_err(|e| self.io_error(e))?;
        serde_json::to_writer_pretty(&mut file, document).map_err(|source| {
            CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        file.write_all(b"\n").map_err(|e| self.io_error(e))?;
        file.as_file().sync_all().map_err(|e| self.io_error(e))?;

        file.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        // Make the rename itself durable
        #[cfg(unix)]
        std::fs::File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|e| self.io_error(e))?;

        Ok(())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Result<StreamPosition, CheckpointError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StreamPosition::START)
            },
            Err(source) => return Err(self.io_error(source)),
        };

        let document: CheckpointDocument =
            serde_json::from_str(&contents).map_err(|source| CheckpointError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        Ok(document.stream_position)
    }

    fn commit(&mut self, position: StreamPosition) -> Result<(), CheckpointError> {
        let current = self.load()?;
        if !check_forward(&self.key, current, position)? {
            return Ok(());
        }

        self.write_atomically(&CheckpointDocument {
            stream_key: self.key.clone(),
            stream_position: position,
            updated_at: Utc::now(),
        })?;

        debug!(
            stream_key = %self.key,
            stream_position = %position,
            path = %self.path.display(),
            "Checkpoint committed"
        );
        Ok(())
    }
}

/// In-process checkpoint with the same rules as the file store
///
/// Keeps the history of commits, which tests and dry runs inspect.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    key: String,
    position: StreamPosition,
    commits: Vec<StreamPosition>,
}

impl MemoryCheckpointStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self::starting_at(key, StreamPosition::START)
    }

    pub fn starting_at(key: impl Into<String>, position: StreamPosition) -> Self {
        Self {
            key: key.into(),
            position,
            commits: Vec::new(),
        }
    }

    /// Every position committed so far, oldest first
    pub fn commits(&self) -> &[StreamPosition] {
        &self.commits
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn key(&self) -> &str {
        &self.key
    }

    fn load(&self) -> Result<StreamPosition, CheckpointError> {
        Ok(self.position)
    }

    fn commit(&mut self, position: StreamPosition) -> Result<(), CheckpointError> {
        if check_forward(&self.key, self.position, position)? {
            self.position = position;
            self.commits.push(position);
        }
        Ok(())
    }
}
