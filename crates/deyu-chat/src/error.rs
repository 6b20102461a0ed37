//! Error types for deyu-chat

use thiserror::Error;

/// Chat error type
#[derive(Debug, Error)]
pub enum Error {
    /// Connection-level failure (DNS, TLS, reset, body read)
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx HTTP status
    #[error("http error {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// User-facing description of the status
        message: String,
    },

    /// Backend envelope reported a business error
    #[error("api error {code}: {message}")]
    Api {
        /// Envelope `code` / `errcode`
        code: i64,
        /// Envelope `msg`
        message: String,
    },

    /// Token missing, expired or rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Response body did not match the expected shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Malformed completion stream frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request cancelled by the caller
    #[error("request cancelled")]
    Cancelled,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                message: crate::api::status_message(status.as_u16()),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

impl Error {
    /// Text suitable for a notice
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Network(_) => crate::api::NETWORK_ERROR_MESSAGE.to_string(),
            Self::Http { message, .. } | Self::Api { message, .. } => message.clone(),
            Self::Unauthorized(message) | Self::InvalidResponse(message) => message.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the user needs to log in again
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Http { status: 401, .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
