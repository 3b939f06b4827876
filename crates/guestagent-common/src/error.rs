//! Common error types for the guest agent.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`GuestAgentError`].
pub type GuestAgentResult<T> = Result<T, GuestAgentError>;

/// Errors shared across the guest agent crates.
#[derive(Error, Diagnostic, Debug)]
pub enum GuestAgentError {
    /// Invalid container ID format.
    #[error("Invalid container ID: {id}")]
    #[diagnostic(
        code(guestagent::container::invalid_id),
        help("Container IDs must be alphanumeric with '-', '_' or '.', 1-128 characters")
    )]
    InvalidContainerId {
        /// The invalid container ID.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(guestagent::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(guestagent::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl GuestAgentError {
    /// Build a configuration error from anything printable.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<toml::de::Error> for GuestAgentError {
    fn from(err: toml::de::Error) -> Self {
        GuestAgentError::Config {
            message: err.to_string(),
        }
    }
}
