//! Error types for the feed client

use thiserror::Error;

/// Feed client errors
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode wire payload: {0}")]
    Decode(String),

    #[error("failed to parse book payload: {0}")]
    Parse(String),

    #[error("hub invoke failed: {0}")]
    Invoke(String),

    #[error("snapshot request failed: {0}")]
    Snapshot(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("client is closed")]
    Closed,

    #[error("outbound send is not supported on a receive-only subscription")]
    NotSupported,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        FeedError::Snapshot(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedError>;
