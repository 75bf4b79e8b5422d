//! Classification of non-success chat-completion responses.

use riskbot_core::Error;

use super::types::OpenAIErrorResponse;

/// Longest slice of a raw error body carried into an error message.
const ERROR_BODY_PREVIEW: usize = 200;

/// OpenAI-compatible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid or missing credentials (401).
    AuthenticationError,
    /// Credentials valid but not allowed (403).
    PermissionDenied,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (_, "invalid_api_key") => Self::AuthenticationError,
            (403, _) => Self::PermissionDenied,
            (429, _) => Self::RateLimitExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }
}

/// Convert a failed response into a riskbot Error.
pub fn to_riskbot_error(code: OpenAIErrorCode, status: u16, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Unauthorized(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::PermissionDenied => {
            Error::Unauthorized(format!("Permission denied: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => {
            Error::RateLimited(format!("Rate limit exceeded: {}", message))
        }
        OpenAIErrorCode::ServerError => Error::ServerError {
            status,
            message: message.to_string(),
        },
        OpenAIErrorCode::Unknown => {
            Error::Internal(format!("Unexpected status {}: {}", status, message))
        }
    }
}

/// Classify a non-2xx response from its status and raw body.
pub fn classify_failure(status: u16, body: &str) -> Error {
    let (error_type, message) = match serde_json::from_str::<OpenAIErrorResponse>(body) {
        Ok(parsed) => (parsed.error.error_type, parsed.error.message),
        Err(_) => (String::new(), preview(body)),
    };
    let code = OpenAIErrorCode::from_response(status, &error_type);
    to_riskbot_error(code, status, &message)
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty body".to_string();
    }
    match trimmed.char_indices().nth(ERROR_BODY_PREVIEW) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
