//! Error types for the Sendgate library.

use thiserror::Error;

/// Main error type for Sendgate operations.
#[derive(Error, Debug)]
pub enum SendgateError {
    /// A configure call carried a zero capacity, zero concurrency,
    /// or zero-length window
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Limits file parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Sendgate operations.
pub type Result<T> = std::result::Result<T, SendgateError>;
