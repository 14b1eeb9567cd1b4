//! Error types for the rover gateway

use thiserror::Error;

use crate::vehicle::TransportKind;

/// Result type alias for rover operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the rover gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Vehicle transport error (open, write, close)
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation requires an open vehicle link
    #[error("vehicle not connected")]
    NotConnected,

    /// Connect requested over a transport other than the configured one
    #[error("transport mismatch: configured {configured}, requested {requested}")]
    TransportMismatch {
        /// Transport the manager was built for
        configured: TransportKind,
        /// Transport the caller asked for
        requested: TransportKind,
    },

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Remote assistant error
    #[error("assistant error: {0}")]
    Assistant(String),

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

    /// Serial port error
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}
