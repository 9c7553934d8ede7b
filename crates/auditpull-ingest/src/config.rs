//! Configuration management
//!
//! Everything the engine needs is carried in an explicit [`IngestConfig`]
//! built from environment variables (a `.env` file is honoured) and the
//! defaults below.

use crate::client::StreamType;
use crate::fetcher::EmptyExhaustion;
use crate::retry::Backoff;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Ingestion Configuration Constants
// ============================================================================

/// Default base URL of the remote event API.
pub const DEFAULT_API_URL: &str = "https://api.box.com/2.0";

/// Default per-request timeout in seconds. Independent of the retry ceiling.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default (and maximum) number of events requested per page.
pub const DEFAULT_PAGE_LIMIT: u32 = 500;

/// Largest page size the event API accepts.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Default checkpoint slot name.
pub const DEFAULT_STREAM_KEY: &str = "admin_logs";

/// Default first backoff delay in milliseconds.
pub const DEFAULT_RETRY_INITIAL_MS: u64 = 1_000;

/// Default cap on a single backoff delay in seconds.
pub const DEFAULT_RETRY_MAX_INTERVAL_SECS: u64 = 60;

/// Default wall-clock ceiling for one retry policy in seconds.
pub const DEFAULT_RETRY_MAX_ELAPSED_SECS: u64 = 300;

/// Default pause after a cycle that reported no forward position.
pub const DEFAULT_NO_PROGRESS_DELAY_MS: u64 = 1_000;

/// Default directory for checkpoint files.
pub const DEFAULT_CHECKPOINT_DIR: &str = "./state";

/// Default directory holding the credentials document.
pub const DEFAULT_CREDENTIALS_DIR: &str = ".";

/// Default credentials document name.
pub const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    InvalidVar {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete engine configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub api: ApiConfig,
    pub stream: StreamConfig,
    pub retry: RetryConfig,
    pub checkpoint: CheckpointConfig,
    pub credentials: CredentialsConfig,
}

/// Remote event API settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

/// Which stream to follow and how
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub stream_type: StreamType,
    /// Checkpoint slot identity; one per stream
    pub stream_key: String,
    pub page_limit: u32,
    pub no_progress_delay: Duration,
}

/// Backoff settings shared by the transport and empty-result policies
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
    pub jitter: bool,
    pub on_empty_exhausted: EmptyExhaustion,
}

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub dir: PathBuf,
}

/// Where the session token comes from
#[derive(Clone)]
pub struct CredentialsConfig {
    pub dir: PathBuf,
    pub file: String,
    /// Token supplied directly, takes precedence over the file
    pub access_token: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("dir", &self.dir)
            .field("file", &self.file)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialsConfig {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: self.initial,
            max_interval: self.max_interval,
            max_elapsed: self.max_elapsed,
            jitter: self.jitter,
            ..Backoff::default()
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_API_URL.to_string(),
                request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            },
            stream: StreamConfig {
                stream_type: StreamType::default(),
                stream_key: DEFAULT_STREAM_KEY.to_string(),
                page_limit: DEFAULT_PAGE_LIMIT,
                no_progress_delay: Duration::from_millis(DEFAULT_NO_PROGRESS_DELAY_MS),
            },
            retry: RetryConfig {
                initial: Duration::from_millis(DEFAULT_RETRY_INITIAL_MS),
                max_interval: Duration::from_secs(DEFAULT_RETRY_MAX_INTERVAL_SECS),
                max_elapsed: Duration::from_secs(DEFAULT_RETRY_MAX_ELAPSED_SECS),
                jitter: true,
                on_empty_exhausted: EmptyExhaustion::default(),
            },
            checkpoint: CheckpointConfig {
                dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            },
            credentials: CredentialsConfig {
                dir: PathBuf::from(DEFAULT_CREDENTIALS_DIR),
                file: DEFAULT_CREDENTIALS_FILE.to_string(),
                access_token: None,
            },
        }
    }
}

impl IngestConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Load configuration from the process environment only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = var("AUDITPULL_API_URL") {
            config.api.base_url = url;
        }
        if let Some(secs) = parse_var("AUDITPULL_REQUEST_TIMEOUT_SECS")? {
            config.api.request_timeout = Duration::from_secs(secs);
        }

        if let Some(stream_type) = parse_var("AUDITPULL_STREAM_TYPE")? {
            config.stream.stream_type = stream_type;
        }
        if let Some(key) = var("AUDITPULL_STREAM_KEY") {
            config.stream.stream_key = key;
        }
        if let Some(limit) = parse_var("AUDITPULL_PAGE_LIMIT")? {
            config.stream.page_limit = limit;
        }
        if let Some(ms) = parse_var("AUDITPULL_NO_PROGRESS_DELAY_MS")? {
            config.stream.no_progress_delay = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var("AUDITPULL_RETRY_INITIAL_MS")? {
            config.retry.initial = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var("AUDITPULL_RETRY_MAX_INTERVAL_SECS")? {
            config.retry.max_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("AUDITPULL_RETRY_MAX_ELAPSED_SECS")? {
            config.retry.max_elapsed = Duration::from_secs(secs);
        }
        if let Some(jitter) = parse_var("AUDITPULL_RETRY_JITTER")? {
            config.retry.jitter = jitter;
        }
        if let Some(policy) = parse_var("AUDITPULL_EMPTY_EXHAUSTION")? {
            config.retry.on_empty_exhausted = policy;
        }

        if let Some(dir) = var("AUDITPULL_CHECKPOINT_DIR") {
            config.checkpoint.dir = PathBuf::from(dir);
        }

        if let Some(dir) = var("AUDITPULL_CREDENTIALS_DIR") {
            config.credentials.dir = PathBuf::from(dir);
        }
        if let Some(file) = var("AUDITPULL_CREDENTIALS_FILE") {
            config.credentials.file = file;
        }
        config.credentials.access_token = var("AUDITPULL_ACCESS_TOKEN");

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("API URL cannot be empty".into()));
        }

        if self.api.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "Request timeout must be greater than 0".into(),
            ));
        }

        if self.stream.page_limit == 0 || self.stream.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "Page limit must be between 1 and {}, got {}",
                MAX_PAGE_LIMIT, self.stream.page_limit
            )));
        }

        if self.stream.stream_key.trim().is_empty() {
            return Err(ConfigError::Invalid("Stream key cannot be empty".into()));
        }

        if self.retry.max_elapsed.is_zero() {
            return Err(ConfigError::Invalid(
                "Retry ceiling must be greater than 0".into(),
            ));
        }

        if self.retry.initial > self.retry.max_interval {
            return Err(ConfigError::Invalid(format!(
                "Initial retry delay ({:?}) exceeds the maximum interval ({:?})",
                self.retry.initial, self.retry.max_interval
            )));
        }

        Ok(())
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidVar {
                    var: name,
                    value: value.clone(),
                    reason: e.to_string(),
                })
        })
        .transpose()
}
