//! Error types for the voice controller

use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice controller and its adapters
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was refused
    #[error("microphone access denied")]
    PermissionDenied,

    /// No recognition or synthesis engine on this platform
    #[error("speech engine unsupported on this platform")]
    Unsupported,

    /// Command backend unreachable or returned an error
    #[error("dispatch failed: {0}")]
    DispatchFailed(String),

    /// Recognition engine error other than an explicit stop
    #[error("recognition error: {0}")]
    RecognitionTransient(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Credential or settings store error
    #[error("credential store error: {0}")]
    Credentials(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error takes the voice modality out of service
    ///
    /// Chat and tasks keep working; only capture is affected.
    #[must_use]
    pub const fn disables_voice(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::Unsupported)
    }

    /// Collapse any transport-level failure into `DispatchFailed`
    #[must_use]
    pub fn into_dispatch(self) -> Self {
        match self {
            Self::DispatchFailed(_) => self,
            other => Self::DispatchFailed(other.to_string()),
        }
    }
}
