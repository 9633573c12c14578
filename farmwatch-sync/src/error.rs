//! Error types for farmwatch-sync.

use thiserror::Error;

/// Errors raised while building the sync pipeline or reading sensors.
///
/// None of these escape [`SyncScheduler::sync_once`](crate::SyncScheduler::sync_once);
/// they are folded into the recorded [`SyncAttempt`](farmwatch_core::SyncAttempt).
#[derive(Debug, Error)]
pub enum SyncError {
    /// The HTTP exchange failed (connection refused, DNS, non-2xx status).
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },

    /// A response body could not be read or decoded.
    #[error("I/O error reading response from {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },

    /// A configured URL did not parse.
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A blocking HTTP task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Convenience constructor for [`SyncError::Http`].
pub(crate) fn http_err(url: impl Into<String>, source: ureq::Error) -> SyncError {
    SyncError::Http {
        url: url.into(),
        source: Box::new(source),
    }
}

/// Convenience constructor for [`SyncError::InvalidUrl`].
pub(crate) fn url_err(url: impl Into<String>, source: url::ParseError) -> SyncError {
    SyncError::InvalidUrl {
        url: url.into(),
        source,
    }
}
