use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - API key or token rejected")]
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

    #[error("Query rejected: {0}")]
    Query(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RemoteError {
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

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            400 | 409 | 422 => RemoteError::Query(truncated),
            401 => RemoteError::Unauthorized,
            403 => RemoteError::AccessDenied(truncated),
            // 406 is what the backend answers when a single row was requested but none matched
            404 | 406 => RemoteError::NotFound(truncated),
            429 => RemoteError::RateLimited,
            500..=599 => RemoteError::Server(truncated),
            _ => RemoteError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}
