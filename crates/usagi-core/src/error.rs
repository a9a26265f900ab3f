//! Unified error types for the usagi core.
//!
//! The taxonomy is deliberately small: transport faults, API call faults,
//! media resolution faults, and handler faults. None of these should ever
//! escape the process; callers recover locally or log and move on.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur on the gateway connection.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Frame send failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// The gateway rejected the session handshake.
    #[error("session handshake failed: {0}")]
    Handshake(String),

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Api Errors
// =============================================================================

/// Errors surfaced to callers of correlated gateway commands.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The reply did not arrive before the deadline.
    #[error("API call timed out")]
    Timeout,

    /// The connection went away while the call was pending.
    #[error("not connected to the gateway")]
    NotConnected,

    /// The gateway returned a malformed or error reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Serialization failure while encoding a frame.
    #[error("serialization error: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

// =============================================================================
// Resolve Errors
// =============================================================================

/// Errors from resolving a media reference to a protocol resource id.
///
/// A resolve failure aborts the enclosing chain build; the owning handler
/// decides whether to retry or to notify the user.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// Reading a media file from disk failed.
    #[error("failed to read media file '{path}': {reason}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// The upload collaborator rejected the media.
    #[error("media upload failed: {0}")]
    Upload(String),

    /// Voice transcoding failed.
    #[error("voice encode failed: {0}")]
    Encode(String),

    /// Text-to-image rendering failed.
    #[error("text render failed: {0}")]
    Render(String),

    /// A chain element was serialized while still unresolved.
    ///
    /// Indicates a bug in the build path rather than a runtime condition.
    #[error("chain element serialized before resolution")]
    Unresolved,
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Errors raised inside a registered handler.
///
/// Caught at the dispatcher boundary, logged with context, and never allowed
/// to affect other handlers or the connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A gateway call made by the handler failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Media resolution inside the handler failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Anything else the handler wants to surface.
    #[error("handler error: {0}")]
    Other(String),
}

impl HandlerError {
    /// Creates a handler error from a message.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for correlated gateway commands.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for media resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type for handler bodies.
pub type HandlerResult<T> = Result<T, HandlerError>;
