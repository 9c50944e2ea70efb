//! Run-level and transport error types.
//!
//! Per-event failures are not errors: they are reported as
//! [`UnresolvedReason`](crate::model::UnresolvedReason) values. Only the
//! conditions that make a whole run meaningless end up in [`ResolverError`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors that abort a resolution run.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("failed to write cache {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run cancelled")]
    Cancelled,
}

impl ResolverError {
    pub fn discovery(msg: impl Into<String>) -> Self {
        Self::Discovery(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn cache_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CacheWrite {
            path: path.into(),
            source,
        }
    }
}

/// Errors produced by a [`Fetcher`](crate::fetch::Fetcher).
///
/// Non-success HTTP statuses are *not* fetch errors; they are returned in the
/// response so callers can decide how to treat them. The one exception is
/// [`FetchError::Status`], a retryable status that outlived every retry.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {0} after retries")]
    Status(u16),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether repeating the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) => true,
            FetchError::Http(e) => {
                e.is_connect() || e.is_timeout() || e.is_request() || e.is_body()
            }
            FetchError::InvalidUrl(_) | FetchError::Status(_) | FetchError::Cancelled => false,
        }
    }
}
