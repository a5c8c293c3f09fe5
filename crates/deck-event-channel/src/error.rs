//! Error types for the event channel

/// Errors raised while talking to the panel backend
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("event stream returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("message is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("message has no event type")]
    MissingType,
}

pub type Result<T> = std::result::Result<T, ChannelError>;
