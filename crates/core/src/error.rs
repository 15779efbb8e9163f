//! Error types for configuration handling.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the core error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or interpreting service configuration.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Configuration could not be parsed.
    #[error("Invalid service configuration: {message}")]
    #[diagnostic(code(skyhook_core::invalid_config))]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Configuration file could not be read.
    #[error("Failed to read configuration file {}: {source}", path.display())]
    #[diagnostic(code(skyhook_core::config_read))]
    ConfigRead {
        /// Path to the file
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(skyhook_core::serialization_error))]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid configuration error
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
