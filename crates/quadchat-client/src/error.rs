//! Client error types.
//!
//! Two families. [`ClientError`] is returned from [`crate::Client::handle`]
//! for malformed input and caller mistakes. [`ChatFailure`] describes
//! expected network outcomes and travels as a notice, never as `Err`.

use quadchat_core::ConnectionError;
use quadchat_proto::{MessageId, MessageStatus, ProtocolError, RoomId};
use thiserror::Error;

/// Errors from client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Room not known to the tracker.
    #[error("room not found: {room_id}")]
    RoomNotFound {
        /// Room that was not found.
        room_id: RoomId,
    },

    /// Message not in any timeline.
    #[error("message not found: {message_id}")]
    MessageNotFound {
        /// Message that was not found.
        message_id: MessageId,
    },

    /// Operation not valid for the message's current status.
    #[error("cannot {operation} message {message_id} in status {status:?}")]
    InvalidTransition {
        /// Message the operation targeted.
        message_id: MessageId,
        /// Its current status.
        status: MessageStatus,
        /// What was attempted.
        operation: &'static str,
    },

    /// Operation needs a server-assigned id.
    #[error("message {message_id} has not been confirmed by the server")]
    Unconfirmed {
        /// Temporary id of the message.
        message_id: MessageId,
    },

    /// Operation needs a focused room.
    #[error("no room is focused")]
    NoFocusedRoom,

    /// Operation needs a signed-in identity.
    #[error("not signed in")]
    NotSignedIn,

    /// Upload batch id not known.
    #[error("unknown upload batch: {batch_id}")]
    UnknownUpload {
        /// Batch that was not found.
        batch_id: u64,
    },

    /// Malformed wire data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection state machine error.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::Json(err))
    }
}

impl ClientError {
    /// Whether the error came from bytes off the wire rather than the caller.
    pub fn is_wire_error(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Connection(ConnectionError::UnexpectedPacket { .. })
        )
    }
}

/// User-visible failure outcomes.
///
/// Each maps to a status the presentation layer reads: a failed message, a
/// disconnected banner, an empty timeline with an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatFailure {
    /// Server refused the token. Login required.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Server-provided reason.
        reason: String,
    },

    /// Connection lost. Reconnect is in progress.
    #[error("connection lost: {reason}")]
    TransportDropped {
        /// What closed the transport.
        reason: String,
    },

    /// Send was rejected or timed out. The message is marked failed.
    #[error("message {temp_id} in {room_id} failed: {reason}")]
    SendFailed {
        /// Room the message was sent to.
        room_id: RoomId,
        /// Temporary id the message keeps.
        temp_id: MessageId,
        /// Ack status or "timed out".
        reason: String,
    },

    /// Attachment batch failed. No message was created.
    #[error("upload {batch_id} failed: {reason}")]
    UploadFailed {
        /// Batch that failed.
        batch_id: u64,
        /// Error from the HTTP collaborator.
        reason: String,
    },

    /// History fetch failed.
    #[error("loading {room_id} failed: {reason}")]
    LoadFailed {
        /// Room whose history failed to load.
        room_id: RoomId,
        /// Error from the HTTP collaborator.
        reason: String,
    },

    /// Favorite toggle was refused and rolled back.
    #[error("favorite toggle on {message_id} failed: {reason}")]
    FavoriteFailed {
        /// Message whose toggle was rolled back.
        message_id: MessageId,
        /// Error from the HTTP collaborator.
        reason: String,
    },
}
