//! Error types for the Cairn SDK.

use thiserror::Error;

/// Errors raised by a transport.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Transport closed")]
    Closed,
}

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// Failure inside the event log or projection layer.
    #[error(transparent)]
    Core(#[from] cairn_core::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    /// The subscription feeding a receive loop was closed.
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Codec error: {0}")]
    Codec(String),
}

impl SdkError {
    /// Classification of a wrapped core error.
    pub fn core_kind(&self) -> Option<cairn_core::ErrorKind> {
        match self {
            SdkError::Core(error) => Some(error.kind()),
            _ => None,
        }
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
