use thiserror::Error;

/// Errors surfaced by model clients.
#[derive(Debug, Error)]
pub enum ModelClientError {
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request exceeded its deadline.
    #[error("model request timed out after {0}ms")]
    Timeout(u64),

    /// The provider returned an error response.
    #[error("model API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// The provider response envelope could not be read.
    #[error("failed to parse API response: {0}")]
    Parse(String),

    /// Client-side configuration problem.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ModelClientError {
    /// Whether a retry with backoff may succeed. Provider restarts and
    /// transient 5xx are expected and must be tolerated.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Parse(_) | Self::Configuration(_) => false,
        }
    }
}
