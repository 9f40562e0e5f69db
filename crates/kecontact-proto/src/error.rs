// ── Protocol error types ──

use thiserror::Error;

/// Errors produced by the pure protocol layer.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// A command parameter is out of the range the device firmware accepts.
    /// Raised before any payload is built, so nothing ever hits the wire.
    #[error("Invalid parameter: {message}")]
    Validation { message: String },

    /// A payload that classified as a report could not be decoded into a
    /// key/value object.
    #[error("Malformed report payload: {reason}")]
    MalformedReport { reason: String },
}

impl ProtoError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
