use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers surfaced with failure
// notifications. Presentation code matches on these, never on messages.

pub mod error_code {
    pub const TRANSIENT_NETWORK: &str = "TRANSIENT_NETWORK";
    pub const REJECTED: &str = "REJECTED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
}

// ── ApiError ────────────────────────────────────────────────────────

/// Failure reported by the network collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("network: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Server { status: u16, message: String },

    #[error("decode: {0}")]
    Decode(String),
}

impl ApiError {
    /// Worth retrying as-is: connectivity problems and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Server { status, .. } => *status >= 500,
            ApiError::Decode(_) => false,
        }
    }
}

// ── FeedError ───────────────────────────────────────────────────────

/// Errors surfaced by the feed engine to its caller.
///
/// Exhausted pagination, duplicate ids in a fetched page and views that
/// reference evicted posts are deliberately absent: they are normal
/// states, handled without raising anything.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// Submit or fetch failed in transit. The action can be retried.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The target post is not in the canonical collection.
    #[error("post '{0}' not found")]
    PostNotFound(String),

    /// Input refused before any network call.
    #[error("{0}")]
    Validation(String),
}

impl FeedError {
    pub fn error_code(&self) -> &'static str {
        match self {
            FeedError::TransientNetwork(_) => error_code::TRANSIENT_NETWORK,
            FeedError::Rejected(_) => error_code::REJECTED,
            FeedError::PostNotFound(_) => error_code::NOT_FOUND,
            FeedError::Validation(_) => error_code::VALIDATION_FAILED,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::TransientNetwork(_))
    }
}

impl From<ApiError> for FeedError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            FeedError::TransientNetwork(err.to_string())
        } else {
            FeedError::Rejected(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_errors_are_transient() {
        let err: FeedError = ApiError::Network("connection reset".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), error_code::TRANSIENT_NETWORK);
        assert_eq!(
            err.to_string(),
            "transient network error: network: connection reset"
        );
    }

    #[test]
    fn server_errors_split_on_status() {
        let unavailable: FeedError = ApiError::Server {
            status: 503,
            message: "try later".into(),
        }
        .into();
        assert!(unavailable.is_retryable());

        let forbidden: FeedError = ApiError::Server {
            status: 403,
            message: "blocked".into(),
        }
        .into();
        assert!(!forbidden.is_retryable());
        assert_eq!(forbidden.error_code(), error_code::REJECTED);
    }

    #[test]
    fn decode_errors_are_rejections() {
        let err: FeedError = ApiError::Decode("bad json".into()).into();
        assert_eq!(err, FeedError::Rejected("decode: bad json".into()));
    }

    #[test]
    fn codes_for_local_errors() {
        assert_eq!(
            FeedError::PostNotFound("p1".into()).error_code(),
            error_code::NOT_FOUND
        );
        assert_eq!(
            FeedError::Validation("empty".into()).error_code(),
            error_code::VALIDATION_FAILED
        );
        assert_eq!(FeedError::PostNotFound("p1".into()).to_string(), "post 'p1' not found");
    }
}
