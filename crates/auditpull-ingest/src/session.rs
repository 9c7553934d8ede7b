//! Authenticated session handle
//!
//! Token acquisition belongs to an external identity collaborator. The engine
//! only needs the resulting bearer token, which it receives as a [`Session`]
//! at construction time.

use crate::config::CredentialsConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while establishing a session
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No access token available. Set AUDITPULL_ACCESS_TOKEN or provide {0}")]
    MissingToken(PathBuf),

    #[error("Failed to read credentials from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse credentials in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct CredentialsDocument {
    #[serde(default)]
    access_token: Option<String>,
}

/// Bearer token for the event API. The token never appears in `Debug` output.
#[derive(Clone)]
pub struct Session {
    access_token: Arc<str>,
}

impl Session {
    /// Wrap an already-issued token. Returns `None` for a blank token.
    pub fn new(access_token: impl AsRef<str>) -> Option<Self> {
        let token = access_token.as_ref().trim();
        if token.is_empty() {
            None
        } else {
            Some(Self {
                access_token: Arc::from(token),
            })
        }
    }

    /// Resolve a session from configuration
    ///
    /// A directly configured token wins; otherwise the credentials document
    /// is read and its `access_token` field used.
    pub fn load(config: &CredentialsConfig) -> Result<Self, AuthError> {
        if let Some(session) = config.access_token.as_deref().and_then(Session::new) {
            return Ok(session);
        }

        let path = config.path();
        let contents = std::fs::read_to_string(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => AuthError::MissingToken(path.clone()),
            _ => AuthError::Read {
                path: path.clone(),
                source,
            },
        })?;

        let document: CredentialsDocument =
            serde_json::from_str(&contents).map_err(|source| AuthError::Parse {
                path: path.clone(),
                source,
            })?;

        document
            .access_token
            .as_deref()
            .and_then(Session::new)
            .ok_or(AuthError::MissingToken(path))
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .finish()
    }
}
