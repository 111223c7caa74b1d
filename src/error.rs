// Error taxonomy for the live engine.
// Every variant is recoverable: the coordinator folds them into status flags.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Timeline fetch failed or returned no frames. Not retried internally.
    #[error("schedule unavailable: {0}")]
    ScheduleUnavailable(String),

    #[error("location unavailable: {0}")]
    LocationUnavailable(String),

    #[error("location permission denied")]
    LocationDenied,

    /// Realtime channel could not be opened.
    #[error("presence channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("invalid frame timestamp {0:?}")]
    InvalidTimestamp(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
