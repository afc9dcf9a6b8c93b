//! Chat data model.
//!
//! These types are shared by the HTTP collaborator (history loads, uploads)
//! and the `/chat` channel (pushes, acks). Field names follow the server's
//! camelCase JSON; aliases accept the Mongo-style `_id` keys the server uses
//! for some documents.

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room (conversation) identifier. Server-assigned, or a client placeholder
/// such as `dm-<a>-<b>` / `group-<millis>`.
pub type RoomId = String;

/// Message identifier. Server-assigned, or `temp-...` while pending.
pub type MessageId = String;

/// User identifier.
pub type UserId = String;

/// Prefix of client-generated message ids.
pub const TEMP_MESSAGE_PREFIX: &str = "temp-";

/// Opaque bearer token.
///
/// Never printed: `Debug` is redacted so tokens do not leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token for the handshake and `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Authenticated user, owned by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id.
    pub id: UserId,
    /// Name shown to other users.
    pub display_name: String,
    /// Bearer token presented at the channel handshake and on HTTP calls.
    pub auth_token: AuthToken,
    /// Avatar reference (URL or asset key), if any.
    pub avatar_ref: Option<String>,
}

impl Identity {
    /// Create an identity without an avatar.
    pub fn new(id: impl Into<UserId>, display_name: impl Into<String>, token: AuthToken) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            auth_token: token,
            avatar_ref: None,
        }
    }
}

/// Directory entry delivered by `user-list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// User id.
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Display name.
    #[serde(default, alias = "name")]
    pub display_name: String,
    /// Avatar reference.
    #[serde(default, alias = "avatar")]
    pub avatar_ref: Option<String>,
    /// Whether the user currently has a live connection.
    #[serde(default, alias = "isOnline")]
    pub online: bool,
    /// Last time the user was seen online.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Delivery status of a message in the local timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically rendered, waiting for the server acknowledgement.
    Pending,
    /// Confirmed by the server. Anything loaded or pushed is `Sent`.
    #[default]
    Sent,
    /// Acknowledgement was negative or never arrived.
    Failed,
}

/// Closed set of attachment kinds.
///
/// Determined once when an attachment enters the system, either from the
/// server's `type` field (MIME type or kind word) or from a local file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum AttachmentKind {
    /// `image/*`
    Image,
    /// `video/*`
    Video,
    /// PDF documents.
    Pdf,
    /// Word processing documents.
    Word,
    /// Spreadsheets.
    Excel,
    /// Anything else.
    Other,
}

impl AttachmentKind {
    /// Classify a MIME type or kind word (`"image/png"`, `"pdf"`,
    /// `"application/vnd.ms-excel"`, ...).
    pub fn classify(mime_or_kind: &str) -> Self {
        let value = mime_or_kind.trim().to_ascii_lowercase();

        if value.starts_with("image") {
            Self::Image
        } else if value.starts_with("video") {
            Self::Video
        } else if value.contains("pdf") {
            Self::Pdf
        } else if value.contains("excel") || value.contains("spreadsheetml") {
            Self::Excel
        } else if value.contains("word") {
            Self::Word
        } else {
            Self::Other
        }
    }

    /// Classify a local file by its extension.
    pub fn from_filename(filename: &str) -> Self {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Self::Other;
        };

        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg" => Self::Image,
            "mp4" | "mov" | "webm" | "mkv" | "avi" => Self::Video,
            "pdf" => Self::Pdf,
            "doc" | "docx" | "odt" | "rtf" => Self::Word,
            "xls" | "xlsx" | "ods" | "csv" => Self::Excel,
            _ => Self::Other,
        }
    }

    /// Canonical kind word used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Excel => "excel",
            Self::Other => "other",
        }
    }
}

impl From<String> for AttachmentKind {
    fn from(value: String) -> Self {
        Self::classify(&value)
    }
}

impl From<AttachmentKind> for &'static str {
    fn from(kind: AttachmentKind) -> Self {
        kind.as_str()
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File attached to a message, resolved to a server URL by the upload step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Server URL of the stored file.
    pub url: String,
    /// Kind, classified at ingestion.
    #[serde(rename = "type", alias = "kind", alias = "mimeType")]
    pub kind: AttachmentKind,
    /// Original file name.
    #[serde(default, alias = "name", alias = "originalName")]
    pub filename: String,
    /// Size in bytes.
    #[serde(default, rename = "size", alias = "sizeBytes")]
    pub size_bytes: u64,
    /// Upload progress (0-100). Only meaningful while the owning message is
    /// pending; never sent over the wire.
    #[serde(skip)]
    pub upload_progress: u8,
}

/// Denormalized snippet of a replied-to message, delivered alongside the
/// reference so replies render even when the original is not loaded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    /// Author of the referenced message.
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Leading text of the referenced message.
    #[serde(default)]
    pub snippet: String,
}

/// Chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, or a `temp-` id while pending.
    #[serde(alias = "_id")]
    pub id: MessageId,
    /// Owning room.
    #[serde(alias = "chatId", alias = "chat")]
    pub room_id: RoomId,
    /// Author.
    #[serde(alias = "sender")]
    pub sender_id: UserId,
    /// Author display name, when the server denormalizes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Text body.
    #[serde(default)]
    pub content: String,
    /// Attached files.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Creation time (server clock once sent, local clock while pending).
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    /// Local delivery status.
    #[serde(default)]
    pub status: MessageStatus,
    /// Users that have read the message.
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    /// Referenced message for replies.
    #[serde(default, alias = "replyTo")]
    pub reply_to_id: Option<MessageId>,
    /// Denormalized reply snippet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_preview: Option<ReplyPreview>,
    /// Whether this message was forwarded from another conversation.
    #[serde(default)]
    pub forwarded: bool,
    /// Users that favorited the message.
    #[serde(default)]
    pub favorited_by: BTreeSet<UserId>,
    /// Temp id the sender used, when the server echoes it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<MessageId>,
}

impl Message {
    /// Text message with default metadata (`Sent`, no attachments).
    pub fn new(
        id: impl Into<MessageId>,
        room_id: impl Into<RoomId>,
        sender_id: impl Into<UserId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            sender_name: None,
            content: content.into(),
            attachments: Vec::new(),
            created_at: DateTime::default(),
            status: MessageStatus::Sent,
            read_by: BTreeSet::new(),
            reply_to_id: None,
            reply_preview: None,
            forwarded: false,
            favorited_by: BTreeSet::new(),
            client_temp_id: None,
        }
    }

    /// Whether the id is a client placeholder.
    pub fn has_temp_id(&self) -> bool {
        self.id.starts_with(TEMP_MESSAGE_PREFIX)
    }

    /// Leading `max_chars` characters of the content, for reply previews.
    pub fn snippet(&self, max_chars: usize) -> String {
        let mut snippet: String = self.content.chars().take(max_chars).collect();
        if self.content.chars().count() > max_chars {
            snippet.push('…');
        }
        snippet
    }

    /// Build the denormalized preview other messages carry when replying to
    /// this one.
    pub fn reply_preview(&self, max_chars: usize) -> ReplyPreview {
        ReplyPreview { sender_name: self.sender_name.clone(), snippet: self.snippet(max_chars) }
    }
}

/// Conversation (direct or group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room id.
    #[serde(alias = "_id")]
    pub id: RoomId,
    /// Group chat (as opposed to a two-person direct chat).
    #[serde(default)]
    pub is_group: bool,
    /// Name shown in the room list.
    #[serde(default, alias = "name")]
    pub display_name: String,
    /// Members; the authority for who may send and receive.
    #[serde(default, alias = "members", alias = "participants")]
    pub member_ids: BTreeSet<UserId>,
    /// Most recent message, for the room list preview.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Messages received while the room was not focused.
    #[serde(default)]
    pub unread_count: u32,
}

impl Room {
    /// Create an empty room.
    pub fn new(
        id: impl Into<RoomId>,
        is_group: bool,
        display_name: impl Into<String>,
        member_ids: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            id: id.into(),
            is_group,
            display_name: display_name.into(),
            member_ids: member_ids.into_iter().collect(),
            last_message: None,
            unread_count: 0,
        }
    }
}
