use thiserror::Error;

/// Failure taxonomy for one feed source within one refresh cycle.
///
/// Only [`FeedError::Fetch`] with `transient == true` is retried; everything
/// else sends the source straight to the fallback path (or marks it
/// unavailable when it already came from there).
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Fetch error for feed {feed_id}: {message}")]
    Fetch {
        feed_id: String,
        message: String,
        transient: bool,
    },
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Fallback store error: {0}")]
    Store(String),
    #[error("No stored snapshot for feed {0}")]
    NotFound(String),
    #[error("Feed {feed_id} unavailable: {reason}")]
    SourceUnavailable { feed_id: String, reason: String },
}

impl FeedError {
    pub fn fetch(feed_id: &str, message: impl Into<String>, transient: bool) -> Self {
        FeedError::Fetch {
            feed_id: feed_id.to_string(),
            message: message.into(),
            transient,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Fetch { transient: true, .. })
    }

    /// Classifies a transport error. Connection-level failures and timeouts
    /// are transient; builder or redirect errors are not.
    pub fn from_reqwest(feed_id: &str, err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err.is_body()
            || err.status().is_some_and(|s| s.is_server_error());
        FeedError::fetch(feed_id, err.to_string(), transient)
    }

    /// Non-success HTTP status. 5xx and 429 are worth retrying.
    pub fn from_status(feed_id: &str, status: reqwest::StatusCode) -> Self {
        let transient =
            status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
        FeedError::fetch(feed_id, format!("HTTP {status}"), transient)
    }
}
