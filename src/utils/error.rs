use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailureKind {
    Timeout,
    Blocked,
    NotFound,
    NetworkError,
}

/// A page could not be fetched. Transient causes have already been retried
/// by the time this surfaces.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("fetch failed ({kind:?}) after {attempts_made} attempt(s): {message}")]
pub struct FetchFailure {
    pub kind: FetchFailureKind,
    pub attempts_made: u32,
    pub message: String,
}

impl FetchFailure {
    pub fn new(kind: FetchFailureKind, attempts_made: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            attempts_made,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    NoPriceFound,
    AmbiguousPrice,
    MalformedPage,
}

/// Page content did not yield a usable price. Never retried.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[error("extraction failed ({kind:?}) using {variant}: {message}")]
pub struct ExtractionFailure {
    pub kind: ExtractionFailureKind,
    pub variant: String,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(kind: ExtractionFailureKind, variant: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            variant: variant.to_string(),
            message: message.into(),
        }
    }
}
