//! Error types for spacebook.
//!
//! Library crates use [`SpacebookError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all spacebook operations.
#[derive(Debug, thiserror::Error)]
pub enum SpacebookError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Plain HTTP failure (bootstrap page, page bodies).
    #[error("network error: {0}")]
    Network(String),

    /// Realtime socket failure that exhausted the reconnect budget.
    #[error("transport error: {reason}")]
    Transport { reason: String },

    /// Malformed frame or a response carrying a non-"ok" status.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The page graph could not be turned into an index tree.
    #[error("index error: {message}")]
    Index { message: String },

    /// Bootstrap state or snapshot payload could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The session was closed while the caller was waiting on it.
    #[error("session closed")]
    SessionClosed,

    /// A caller-imposed deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SpacebookError>;

impl SpacebookError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a transport error from a close/error reason.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create an index error from any displayable message.
    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SpacebookError::config("missing entry url");
        assert_eq!(err.to_string(), "config error: missing entry url");

        let err = SpacebookError::protocol("status \"permission_denied\" for request 4");
        assert!(err.to_string().contains("permission_denied"));

        let err = SpacebookError::transport("gave up after 101 attempts");
        assert!(err.to_string().starts_with("transport error"));
    }
}
