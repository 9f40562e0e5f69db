// ── Core error types ──
//
// User-facing errors from the connection engine. Inbound decode failures
// are deliberately absent: a datagram that cannot be classified or parsed
// is logged and dropped, never surfaced to callers or observers.

use std::net::IpAddr;

use kecontact_proto::ProtoError;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Setup errors ─────────────────────────────────────────────────
    /// The station did not answer the identification request in time.
    /// Never retried automatically.
    #[error("Charging station at {host} did not reply within {timeout_secs}s")]
    SetupTimeout { host: IpAddr, timeout_secs: u64 },

    /// The station answered, but the identification report was
    /// structurally invalid.
    #[error("Charging station at {host} sent an invalid identification report: {reason}")]
    InvalidIdentification { host: IpAddr, reason: String },

    /// The given host is not a syntactically valid IP address.
    #[error("Not a valid IP address: {host}")]
    InvalidHost { host: String },

    // ── Transport errors ─────────────────────────────────────────────
    /// The socket is gone (engine shut down). Fatal for the operation;
    /// there is nothing to retry.
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    // ── Operation errors ─────────────────────────────────────────────
    /// A reply of the same kind from the same host is already being
    /// awaited by another caller.
    #[error("A reply from {host} is already awaited by another caller")]
    ReplyPending { host: IpAddr },

    /// A command parameter failed validation before any network I/O.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The command is not in the capability set of this station model.
    #[error("{operation} is not available on a {model} charging station")]
    Unsupported {
        operation: &'static str,
        model: String,
    },
}

impl From<ProtoError> for CoreError {
    fn from(err: ProtoError) -> Self {
        match err {
            ProtoError::Validation { message } => Self::Validation { message },
            ProtoError::MalformedReport { reason } => Self::Validation {
                message: format!("malformed report: {reason}"),
            },
        }
    }
}
