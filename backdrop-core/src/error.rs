use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackdropError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {}ms: {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Pixel readback refused for {0}")]
    ReadbackDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Operation already in progress: {0}")]
    Busy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BackdropError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Timeouts and network failures are retried on the next load and are
    /// eligible for toast suppression.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network(_) | Self::HttpStatus { .. }
        )
    }
}

impl From<tokio::task::JoinError> for BackdropError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("background task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, BackdropError>;
