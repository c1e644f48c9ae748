//! Error types for feeddigest.
//!
//! Library crates use [`FeedDigestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// Why a call to an external stage (classifier, summarizer) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalFailureKind {
    /// The call did not complete within its timeout or the run deadline.
    Timeout,
    /// The backend asked us to slow down.
    RateLimited,
    /// The response could not be parsed or was not position-aligned with the request.
    Malformed,
    /// Transport failure or non-success status.
    Unavailable,
}

impl fmt::Display for ExternalFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::Malformed => "malformed response",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all feeddigest operations.
#[derive(Debug, thiserror::Error)]
pub enum FeedDigestError {
    /// Configuration loading or validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// An external stage (classifier or summarizer) failed for one call.
    #[error("{stage} failed ({kind}): {message}")]
    External {
        stage: &'static str,
        kind: ExternalFailureKind,
        message: String,
    },

    /// The seen store could not be opened or queried.
    #[error("seen store unavailable: {0}")]
    StoreUnavailable(String),

    /// Network/HTTP error while fetching feeds or article pages.
    #[error("network error: {0}")]
    Network(String),

    /// Feed or HTML parsing error.
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
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FeedDigestError>;

impl FeedDigestError {
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

    /// Create an external stage failure.
    pub fn external(
        stage: &'static str,
        kind: ExternalFailureKind,
        msg: impl Into<String>,
    ) -> Self {
        Self::External {
            stage,
            kind,
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

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::External { .. } | Self::Network(_))
    }
}
