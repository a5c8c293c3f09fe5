//! Error types for the execution tracker

/// Errors raised by tracker collaborators
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("queue request failed: {0}")]
    QueueRequest(String),

    #[error("queue response could not be decoded: {0}")]
    QueueDecode(#[from] serde_json::Error),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
