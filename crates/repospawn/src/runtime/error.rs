//! Container runtime error types.

use thiserror::Error;

/// Result type for container runtime operations.
pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors that can occur talking to the container runtime.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The runtime command failed for a reason other than "not found".
    #[error("container {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Failed to parse runtime output.
    #[error("failed to parse runtime output: {0}")]
    ParseError(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
