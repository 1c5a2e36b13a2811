//! Error types for portlink.

use thiserror::Error;

/// Main error type for all portlink operations.
#[derive(Debug, Error)]
pub enum PortlinkError {
    /// The underlying channel or endpoint closed.
    #[error("endpoint closed")]
    Closed,

    /// A call's local timeout fired before a response arrived.
    ///
    /// The peer is not notified; it may still be working on the request.
    #[error("call timed out after {0:?}")]
    CallTimeout(std::time::Duration),

    /// The peer answered with an `error` packet.
    #[error("remote error: {0}")]
    Remote(String),

    /// A stale sink handle was invoked after a newer handle was minted.
    #[error("stale sink handle (a newer handle was taken)")]
    StaleSink,

    /// A cooperative cancellation was requested.
    #[error("cancelled")]
    Cancelled,

    /// A source node's driver failed; the reason is re-raised to consumers.
    #[error("stream failed: {0}")]
    Stream(String),

    /// Protocol error (malformed packet, unexpected shape, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using PortlinkError.
pub type Result<T> = std::result::Result<T, PortlinkError>;
