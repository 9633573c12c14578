//! Error types for farmwatch-watchdog.

use thiserror::Error;

/// Errors from talking to the control endpoint.
///
/// [`HttpServiceProbe`](crate::HttpServiceProbe) folds all of these into
/// `Stopped` / a refused start; they only surface from its constructor and
/// in logs.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("control request failed: {0}")]
    Http(#[from] Box<ureq::Error>),

    #[error("control response unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid control URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<ureq::Error> for WatchdogError {
    fn from(err: ureq::Error) -> Self {
        WatchdogError::Http(Box::new(err))
    }
}
