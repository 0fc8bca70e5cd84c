//! Error types for threadcrawl.
//!
//! Library crates use [`ThreadCrawlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all threadcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum ThreadCrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the chat transport or a linked resource.
    #[error("network error: {0}")]
    Network(String),

    /// Payload decoding or content parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Search index / database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Image captioning or webpage extraction error.
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The transport returned a page without data its contract requires.
    /// Always aborts the crawl.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A message lacks the text, timestamp, or author needed to index it.
    #[error("malformed message: {message}")]
    MalformedMessage { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ThreadCrawlError>;

impl ThreadCrawlError {
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

    /// Create a protocol violation from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: msg.into(),
        }
    }

    /// Create a malformed-message error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage {
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

    /// Whether this error must abort a running crawl.
    ///
    /// Only the transport contract errors qualify; everything raised inside
    /// an enrichment path is contained by the caller.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ThreadCrawlError::config("missing Slack token");
        assert_eq!(err.to_string(), "config error: missing Slack token");

        let err = ThreadCrawlError::protocol("response_metadata is missing");
        assert_eq!(
            err.to_string(),
            "protocol violation: response_metadata is missing"
        );

        let err = ThreadCrawlError::malformed("ts is missing");
        assert!(err.to_string().contains("ts is missing"));
    }

    #[test]
    fn protocol_violation_detection() {
        assert!(ThreadCrawlError::protocol("x").is_protocol_violation());
        assert!(!ThreadCrawlError::malformed("x").is_protocol_violation());
        assert!(!ThreadCrawlError::Network("x".into()).is_protocol_violation());
    }
}
