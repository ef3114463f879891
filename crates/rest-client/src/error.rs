use thiserror::Error;

/// Transport-level errors for REST calls.
#[derive(Debug, Error)]
pub enum RestError {
    /// Non-success HTTP status; `body` carries the raw response text.
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
    },

    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

impl RestError {
    /// Whether retrying the same request can plausibly succeed:
    /// timeouts, connection failures, rate limiting and server-side
    /// (5xx) errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}
