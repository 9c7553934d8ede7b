//! auditpull Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the auditpull workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the shared error type and result alias
//! - **Logging**: `tracing` subscriber setup driven by `LogConfig`
//! - **Types**: `StreamPosition`, the cursor into the remote event history
//!
//! # Example
//!
//! ```no_run
//! use auditpull_common::types::StreamPosition;
//!
//! let position: StreamPosition = "1152922976252290886".parse().unwrap();
//! assert!(position.is_forward());
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{AuditPullError, Result};
pub use types::StreamPosition;
