use std::io;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RepossessedError {
    #[error("Network: {0}")]
    Network(String),

    #[error("Unhandled status code: {0}")]
    UnhandledStatusCode(StatusCode),

    #[error("Unexpected response body: {0}")]
    Parse(String),

    #[error("Cannot extract layer archive: {0}")]
    Extraction(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Layer index {index} out of range for {len} layers")]
    LayerIndexOutOfRange { index: usize, len: usize },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for RepossessedError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::UnhandledStatusCode(status),
            None if err.is_decode() => Self::Parse(err.to_string()),
            None => Self::Network(err.to_string()),
        }
    }
}

impl From<io::Error> for RepossessedError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RepossessedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RepossessedError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepossessedError>;
