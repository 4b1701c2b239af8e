use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport-level failure: DNS, connect, TLS, timeout.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-success status from the backend, outside the 401 refresh path.
    #[error("backend error ({status}): {message}")]
    Http { status: u16, message: String },

    /// The session's credentials are no longer valid and could not be
    /// refreshed. The session has already been torn down when this
    /// surfaces.
    #[error("authentication expired")]
    AuthExpired,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// The backend wraps handled errors as `{"message": "..."}`.
#[derive(Debug, Deserialize)]
struct BackendMessage {
    message: String,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data.
    /// The cut point backs up to a char boundary so multibyte text
    /// (the backend's messages are Portuguese) can never split a
    /// character.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut cut = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..cut],
            body.len()
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        // Prefer the backend's own message over the raw body.
        let message = serde_json::from_str::<BackendMessage>(body)
            .map(|m| m.message)
            .unwrap_or_else(|_| Self::truncate_body(body));
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }
}
