//! Error types shared by auditpull crates

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, AuditPullError>;

/// Main error type for auditpull
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditPullError {
    #[error("Invalid stream position: {0}")]
    InvalidPosition(String),
}

impl AuditPullError {
    /// Create an invalid position error
    pub fn invalid_position(msg: impl Into<String>) -> Self {
        Self::InvalidPosition(msg.into())
    }
}
