use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown {kind}: {value}")]
    UnknownValue { kind: &'static str, value: String },

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("invalid config value for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    /// The backend refused the payload itself. Sending it again fails the
    /// same way, so callers must not queue it for retry.
    #[error("rejected: {0}")]
    Rejected(String),
}
