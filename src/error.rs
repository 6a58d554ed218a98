/// Centralized error types for the collector
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollectError {
    // Network Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Provider throttled request (retry after {retry_after_secs}s)")]
    Throttled { retry_after_secs: u64 },

    // Data Errors
    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Checkpoint write failed: {0}")]
    CheckpointFailed(String),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic Errors
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CollectError>;

impl CollectError {
    /// Check if the error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            CollectError::HttpError(_) => true,
            CollectError::Throttled { .. } => true,
            CollectError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Check if the error must terminate the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectError::CheckpointFailed(_) | CollectError::ConfigError(_)
        )
    }
}
