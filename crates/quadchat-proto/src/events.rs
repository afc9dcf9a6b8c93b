//! Typed `/chat` events.
//!
//! [`ClientEmit`] covers everything the client sends, [`ServerPush`] every
//! event the server pushes, and [`SendAck`] the acknowledgement of
//! `send-message`. Conversions to and from [`SocketPacket`] live here so the
//! event names and argument shapes are defined exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::{ProtocolError, Result},
    model::{Attachment, Message, MessageId, Room, RoomId, UserId, UserSummary},
    packet::SocketPacket,
};

const JOIN_CHAT: &str = "join-chat";
const LEAVE_CHAT: &str = "leave-chat";
const SEND_MESSAGE: &str = "send-message";
const TYPING: &str = "typing";
const FETCH_USER_LIST: &str = "fetch-user-list";
const PRESENCE_SUBSCRIBE: &str = "presence:subscribe";

const NEW_MESSAGE: &str = "new-message";
const ROOM_UPSERT: &str = "room-upsert";
const USER_LIST: &str = "user-list";
const PRESENCE: &str = "presence";

/// Body of `send-message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Target room.
    pub chat_id: RoomId,
    /// Text body.
    pub content: String,
    /// Already-uploaded attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Temp id of the optimistic message, echoed back by servers that
    /// support it.
    pub client_temp_id: MessageId,
    /// Message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Whether this is a forwarded copy.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forwarded: bool,
}

/// Typing indicator payload (both directions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "roomId")]
    chat_id: Option<RoomId>,
    is_typing: bool,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEmit {
    /// Subscribe to a room's messages.
    JoinChat {
        /// Room to join.
        room_id: RoomId,
    },
    /// Unsubscribe from a room.
    LeaveChat {
        /// Room to leave.
        room_id: RoomId,
    },
    /// Send a message; always carries an ack id.
    SendMessage(SendMessageRequest),
    /// Local typing state changed.
    Typing {
        /// Room being typed in.
        chat_id: RoomId,
        /// Started (`true`) or stopped (`false`).
        is_typing: bool,
    },
    /// Ask for the user directory (answered with `user-list`).
    FetchUserList,
    /// Start receiving `presence` broadcasts.
    PresenceSubscribe,
}

impl ClientEmit {
    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => JOIN_CHAT,
            Self::LeaveChat { .. } => LEAVE_CHAT,
            Self::SendMessage(_) => SEND_MESSAGE,
            Self::Typing { .. } => TYPING,
            Self::FetchUserList => FETCH_USER_LIST,
            Self::PresenceSubscribe => PRESENCE_SUBSCRIBE,
        }
    }

    /// Build the event packet.
    pub fn into_packet(self, namespace: &str, ack_id: Option<u64>) -> Result<SocketPacket> {
        let name = self.event_name();
        let args = match self {
            Self::JoinChat { room_id } | Self::LeaveChat { room_id } => {
                vec![Value::String(room_id)]
            },
            Self::SendMessage(request) => vec![serde_json::to_value(request)?],
            Self::Typing { chat_id, is_typing } => vec![serde_json::to_value(TypingBody {
                user_id: None,
                name: None,
                chat_id: Some(chat_id),
                is_typing,
            })?],
            Self::FetchUserList | Self::PresenceSubscribe => Vec::new(),
        };

        Ok(SocketPacket::event(namespace, name, args, ack_id))
    }

    /// Parse an event packet sent by a client (server side).
    pub fn from_packet(packet: &SocketPacket) -> Result<Self> {
        let (name, args) = packet
            .as_event()
            .ok_or_else(|| ProtocolError::MalformedEvent("not an event packet".into()))?;

        match name {
            JOIN_CHAT => Ok(Self::JoinChat { room_id: string_arg(name, args)? }),
            LEAVE_CHAT => Ok(Self::LeaveChat { room_id: string_arg(name, args)? }),
            SEND_MESSAGE => Ok(Self::SendMessage(object_arg(name, args)?)),
            TYPING => {
                let body: TypingBody = object_arg(name, args)?;
                let chat_id = body.chat_id.ok_or_else(|| {
                    ProtocolError::MalformedEvent("typing without chatId".into())
                })?;
                Ok(Self::Typing { chat_id, is_typing: body.is_typing })
            },
            FETCH_USER_LIST => Ok(Self::FetchUserList),
            PRESENCE_SUBSCRIBE => Ok(Self::PresenceSubscribe),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// Someone started or stopped typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingNotice {
    /// Typing user.
    pub user_id: UserId,
    /// Display name of the typing user.
    pub name: String,
    /// Room, when the server includes it.
    pub chat_id: Option<RoomId>,
    /// Started (`true`) or stopped (`false`).
    pub is_typing: bool,
}

/// Online status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    /// User whose status changed.
    pub user_id: UserId,
    /// Online now.
    pub online: bool,
    /// Last time seen online.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPush {
    /// Message posted to a joined room.
    NewMessage(Message),
    /// Typing indicator.
    Typing(TypingNotice),
    /// Room created or updated.
    RoomUpsert(Room),
    /// Full user directory snapshot.
    UserList(Vec<UserSummary>),
    /// Online status change.
    Presence(PresenceUpdate),
}

impl ServerPush {
    /// Parse a pushed event packet.
    pub fn from_packet(packet: &SocketPacket) -> Result<Self> {
        let (name, args) = packet
            .as_event()
            .ok_or_else(|| ProtocolError::MalformedEvent("not an event packet".into()))?;

        match name {
            NEW_MESSAGE => Ok(Self::NewMessage(object_arg(name, args)?)),
            TYPING => {
                let body: TypingBody = object_arg(name, args)?;
                let user_id = body.user_id.ok_or_else(|| {
                    ProtocolError::MalformedEvent("typing without userId".into())
                })?;
                Ok(Self::Typing(TypingNotice {
                    name: body.name.unwrap_or_else(|| user_id.clone()),
                    user_id,
                    chat_id: body.chat_id,
                    is_typing: body.is_typing,
                }))
            },
            ROOM_UPSERT => Ok(Self::RoomUpsert(object_arg(name, args)?)),
            USER_LIST => Ok(Self::UserList(object_arg(name, args)?)),
            PRESENCE => Ok(Self::Presence(object_arg(name, args)?)),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }

    /// Build the pushed event packet (server side).
    pub fn into_packet(self, namespace: &str) -> Result<SocketPacket> {
        let (name, arg) = match self {
            Self::NewMessage(message) => (NEW_MESSAGE, serde_json::to_value(message)?),
            Self::Typing(notice) => (
                TYPING,
                serde_json::to_value(TypingBody {
                    user_id: Some(notice.user_id),
                    name: Some(notice.name),
                    chat_id: notice.chat_id,
                    is_typing: notice.is_typing,
                })?,
            ),
            Self::RoomUpsert(room) => (ROOM_UPSERT, serde_json::to_value(room)?),
            Self::UserList(users) => (USER_LIST, serde_json::to_value(users)?),
            Self::Presence(update) => (PRESENCE, serde_json::to_value(update)?),
        };

        Ok(SocketPacket::event(namespace, name, vec![arg], None))
    }
}

/// Acknowledgement of `send-message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendAck {
    /// Stored; carries the server copy with its permanent id.
    Ok(Message),
    /// Anything other than `status: "ok"` with a message.
    Rejected {
        /// Status string reported by the server.
        status: String,
    },
}

#[derive(Serialize, Deserialize)]
struct AckBody {
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Message>,
}

impl SendAck {
    /// Interpret ack arguments. Malformed acks count as rejections.
    pub fn from_args(args: &[Value]) -> Self {
        let Some(first) = args.first() else {
            return Self::Rejected { status: "empty-ack".into() };
        };

        match serde_json::from_value::<AckBody>(first.clone()) {
            Ok(AckBody { status, message: Some(message) }) if status == "ok" => Self::Ok(message),
            Ok(AckBody { status, .. }) if status == "ok" => {
                Self::Rejected { status: "ok-without-message".into() }
            },
            Ok(AckBody { status, .. }) => Self::Rejected { status },
            Err(_) => Self::Rejected { status: "malformed-ack".into() },
        }
    }

    /// Ack arguments (server side).
    pub fn into_args(self) -> Result<Vec<Value>> {
        let body = match self {
            Self::Ok(message) => AckBody { status: "ok".into(), message: Some(message) },
            Self::Rejected { status } => AckBody { status, message: None },
        };
        Ok(vec![serde_json::to_value(body)?])
    }
}

fn string_arg(event: &str, args: &[Value]) -> Result<String> {
    args.first()
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MalformedEvent(format!("{event}: expected string argument")))
}

fn object_arg<T: serde::de::DeserializeOwned>(event: &str, args: &[Value]) -> Result<T> {
    let first = args
        .first()
        .ok_or_else(|| ProtocolError::MalformedEvent(format!("{event}: missing argument")))?;
    Ok(serde_json::from_value(first.clone())?)
}
