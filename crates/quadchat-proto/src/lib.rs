//! Wire protocol and data model for the quadchat session core.
//!
//! The chat channel is a Socket.IO v5 namespace (`/chat`) carried over
//! Engine.IO v4 text frames on a WebSocket. This crate owns three layers:
//!
//! - [`model`]: the JSON data model shared with the HTTP API (rooms, messages,
//!   attachments, user summaries).
//! - [`packet`]: the textual packet codec ([`EnginePacket`] wrapping
//!   [`SocketPacket`]).
//! - [`events`]: typed client emits ([`ClientEmit`]), server pushes
//!   ([`ServerPush`]) and the `send-message` acknowledgement ([`SendAck`]).
//!
//! No I/O happens here. Transports hand raw text frames to
//! [`EnginePacket::decode`] and write the output of [`EnginePacket::encode`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod events;
pub mod model;
pub mod packet;

pub use errors::{ProtocolError, Result};
pub use events::{
    ClientEmit, PresenceUpdate, SendAck, SendMessageRequest, ServerPush, TypingNotice,
};
pub use model::{
    Attachment, AttachmentKind, AuthToken, Identity, Message, MessageId, MessageStatus,
    ReplyPreview, Room, RoomId, UserId, UserSummary,
};
pub use packet::{EnginePacket, OpenHandshake, PacketKind, SocketPacket};

/// Socket.IO namespace used by the chat channel.
pub const CHAT_NAMESPACE: &str = "/chat";
