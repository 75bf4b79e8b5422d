//! Error types for the riskbot pipeline.

use thiserror::Error;

use crate::models::{ExtractionFailure, FailureKind};

/// Result type alias using riskbot's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for riskbot operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Staging directory not writable, disk full, oversized upload or
    /// duplicate request.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The staged file could not be turned into records.
    #[error("Extraction error ({reason}): {detail}")]
    Extraction {
        reason: ExtractionFailure,
        detail: String,
    },

    /// A bounded operation ran past its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// AI endpoint rejected the credentials (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// AI endpoint throttled the request (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// AI endpoint answered with a 5xx status
    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Connection, I/O or body transfer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// 2xx response without a usable result field
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an extraction failure.
    pub fn extraction(reason: ExtractionFailure, detail: impl Into<String>) -> Self {
        Error::Extraction {
            reason,
            detail: detail.into(),
        }
    }

    /// The failure category a pipeline run reports for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Storage(_) | Error::Io(_) => FailureKind::Storage,
            Error::Extraction { .. } => FailureKind::Extraction,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Unauthorized(_) => FailureKind::Unauthorized,
            Error::RateLimited(_) => FailureKind::RateLimited,
            Error::ServerError { .. } => FailureKind::ServerError,
            Error::Transport(_) => FailureKind::Transport,
            Error::MalformedResponse(_) => FailureKind::MalformedResponse,
            Error::Serialization(_) | Error::Config(_) | Error::Internal(_) => {
                FailureKind::Internal
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Transport(e.to_string())
        }
    }
}
