//! CLI error type with exit codes.

use thiserror::Error;

use kecontact_core::CoreError;

/// Exit codes, stable for scripting.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    Usage { message: String },
}

impl CliError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Core(CoreError::SetupTimeout { .. }) => exit_code::TIMEOUT,
            Self::Core(
                CoreError::InvalidHost { .. }
                | CoreError::Validation { .. }
                | CoreError::Unsupported { .. },
            )
            | Self::Usage { .. } => exit_code::USAGE,
            Self::Core(CoreError::TransportUnavailable { .. } | CoreError::Io(_)) | Self::Io(_) => {
                exit_code::CONNECTION
            }
            Self::Core(_) => exit_code::GENERAL,
        }
    }
}
