//! Error types for deyu-asr

use crate::mode::DeviceErrorKind;
use thiserror::Error;

/// ASR error type
#[derive(Debug, Error)]
pub enum Error {
    /// Audio device error
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// Audio stream error
    #[error("audio stream error: {0}")]
    AudioStream(String),

    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No input device
    #[error("no input device: {0}")]
    DeviceNotFound(String),

    /// Recognition socket error
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed recognition frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No local recognizer available
    #[error("fallback recognizer unsupported: {0}")]
    FallbackUnsupported(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify a capture failure
    #[must_use]
    pub fn device_error_kind(&self) -> DeviceErrorKind {
        match self {
            Self::PermissionDenied(_) => DeviceErrorKind::PermissionDenied,
            Self::DeviceNotFound(_) => DeviceErrorKind::NotFound,
            _ => DeviceErrorKind::Other,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
