//! Runtime error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while assembling or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The gateway connection could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] usagi_core::TransportError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
