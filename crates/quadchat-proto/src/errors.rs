//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding channel packets.
///
/// Every variant describes a malformed or unsupported packet. These are the
/// "truly unexpected" failures that propagate as hard errors; network-level
/// failures never appear here.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Zero-length frame.
    #[error("empty packet")]
    Empty,

    /// First character is not a known Engine.IO packet type.
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEngineType(char),

    /// First character of a message body is not a known Socket.IO type.
    #[error("unknown socket.io packet type {0:?}")]
    UnknownPacketType(char),

    /// Binary event/ack packets need attachment frames, which this client
    /// never negotiates.
    #[error("binary socket.io packets are not supported")]
    BinaryUnsupported,

    /// Ack id digits do not fit in a `u64`.
    #[error("invalid ack id: {0}")]
    InvalidAckId(String),

    /// Event packet body is not a JSON array starting with a string name, or
    /// its arguments do not match the expected shape.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// Event name is not part of the `/chat` contract.
    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    /// JSON encode/decode failure.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
