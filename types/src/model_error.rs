use thiserror::Error;

/// Failure classification for a remote model call (§4.5, §7).
///
/// Every provider implementation must raise one of these three kinds; nothing
/// else reaches the retry policy.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Non-retryable: 4xx other than 429, invalid request, auth failure.
    #[error("permanent model error: {0}")]
    Permanent(String),

    /// HTTP 429. `retry_after` is the server-suggested backoff, if given.
    #[error("rate limited: {0}")]
    RateLimit {
        message: String,
        retry_after: Option<f64>,
    },

    /// 5xx, timeout, connection reset — worth retrying.
    #[error("transient model error: {0}")]
    Transient(String),
}

impl ModelError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ModelError::Permanent(_))
    }
}
