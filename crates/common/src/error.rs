//! Error types for the Lanscope engine
//!
//! Probe outcomes (timeouts, refusals, malformed replies) are results, not
//! errors. These variants cover setup failures only.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LanscopeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resolution failed: {0}")]
    Resolve(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Result type alias for Lanscope operations
pub type LanscopeResult<T> = Result<T, LanscopeError>;
