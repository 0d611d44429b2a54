use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Auth(String),

    #[error("Unauthorized - session may be expired")]
    Unauthorized,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// The error shapes the auth and table endpoints send back.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .filter(|m| !m.is_empty())
    }
}

impl BackendError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Human-readable message from a JSON error body, else the truncated raw body.
    fn message_from_body(body: &str) -> String {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(ErrorBody::into_message)
            .unwrap_or_else(|| Self::truncate_body(body))
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::message_from_body(body);
        match status.as_u16() {
            400 | 422 => BackendError::Auth(message),
            401 => BackendError::Unauthorized,
            403 => BackendError::Auth(message),
            404 => BackendError::NotFound(message),
            429 => BackendError::RateLimited,
            500..=599 => BackendError::Server(message),
            _ => BackendError::InvalidResponse(format!("Status {}: {}", status, message)),
        }
    }
}
