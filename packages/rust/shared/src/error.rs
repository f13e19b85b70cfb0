//! Error types for Feedloom.
//!
//! Library crates use [`FeedloomError`] via `thiserror`.
//! The CLI app wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Feedloom operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedloomError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the transformer service.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or payload parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Content transform error (transformer call or result validation).
    #[error("transform error: {0}")]
    Transform(String),

    /// Cron schedule parsing or job lifecycle error.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad task definition, unknown handler, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeedloomError>;

impl FeedloomError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
