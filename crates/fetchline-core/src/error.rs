//! Error types for Fetchline core

use fetchline_types::ErrorKind;
use thiserror::Error;

/// Errors that can occur while probing or transferring a resource
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: {status}")]
    Server { status: u16 },

    #[error("Transfer interrupted: {0}")]
    Transfer(String),

    #[error("Timeout")]
    Timeout,

    #[error("Giving up after {attempts} retries: {last}")]
    RetryExhausted { attempts: u32, last: String },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FetchError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(e) => e.status().map_or(true, |s| s.as_u16() != 404),
            FetchError::Io(_)
            | FetchError::Server { .. }
            | FetchError::Transfer(_)
            | FetchError::Timeout => true,
            _ => false,
        }
    }

    /// Category reported to subscribers
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Probe(_) => ErrorKind::Probe,
            FetchError::NotFound(_) => ErrorKind::NotFound,
            FetchError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            FetchError::InvalidJob(_) | FetchError::Serialization(_) => ErrorKind::InvalidJob,
            FetchError::Network(_)
            | FetchError::Io(_)
            | FetchError::Server { .. }
            | FetchError::Transfer(_)
            | FetchError::Timeout => ErrorKind::Transfer,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        FetchError::Serialization(error.to_string())
    }
}
