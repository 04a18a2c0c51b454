//! Error types for the sync layer.

use thiserror::Error;

/// Errors from the local persistence cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache entry {key} is not valid JSON: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from loading or saving through the sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The request never produced a response (offline, DNS, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with a failure status or a negative ack.
    #[error("server rejected {key} (status {status}): {message}")]
    Rejected {
        key: String,
        status: u16,
        message: String,
    },

    /// Read path exhausted: the fetch failed, nothing was cached and the retry failed too.
    #[error("no cached copy of {key} and the server is unreachable")]
    NoCachedCopy {
        key: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("invalid API URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Errors recovered locally (cache fallback on read, queueing on write).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Rejected { .. })
    }
}
