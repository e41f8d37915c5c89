use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Non-2xx response. `message` is the server's `error.message` when the
    /// body has one, otherwise the raw body.
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },
}

impl ClientError {
    /// Worth retrying later: network trouble, overload or rate limiting.
    /// Validation failures will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::InvalidBaseUrl(_) => false,
            ClientError::RequestFailed(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::ServerError { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504)
            }
        }
    }

    /// The server answered and refused the payload. Only HTTP responses
    /// count: a request that never got an answer may still succeed later.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::ServerError { .. }) && !self.is_retryable()
    }
}
