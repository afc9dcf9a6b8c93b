//! Client events and actions.

use quadchat_core::SessionContext;
use quadchat_proto::{Attachment, Message, MessageId, RoomId, UserId};
use url::Url;

use crate::{error::ChatFailure, upload::LocalFile};

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Receiving text frames from the transport
/// - Reporting transport closure
/// - Driving time forward via ticks
/// - Forwarding user intents (focus, send, favorite, ...)
/// - Feeding back the results of HTTP work the client asked for
///
/// Generic over `I` (Instant type) so simulations can drive a virtual clock.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// An identity became available, or changed.
    SignIn(SessionContext),

    /// Logout. Closes the transport and drops all state.
    SignOut,

    /// Text frame received from the transport.
    FrameReceived(String),

    /// The transport closed or errored.
    TransportClosed {
        /// What the transport reported.
        reason: String,
    },

    /// Time tick for timeouts, reconnects and typing expiry.
    ///
    /// The caller should send ticks periodically (tens of milliseconds is
    /// plenty for the typing debounce).
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// User opened a room.
    Focus {
        /// Room to focus.
        room_id: RoomId,
    },

    /// User left a room.
    Leave {
        /// Room to leave.
        room_id: RoomId,
    },

    /// User typed in the composer of the focused room.
    Keystroke,

    /// User pressed send in the focused room.
    Send {
        /// Message text.
        content: String,
        /// Files to upload first. Empty for a text-only send.
        files: Vec<LocalFile>,
        /// Message being replied to.
        reply_to: Option<MessageId>,
    },

    /// Retry a failed message.
    Resend {
        /// Temp id the failed message kept.
        temp_id: MessageId,
    },

    /// Drop a failed message.
    Discard {
        /// Temp id the failed message kept.
        temp_id: MessageId,
    },

    /// Copy a message into other rooms.
    Forward {
        /// Message to copy.
        message_id: MessageId,
        /// Rooms to copy it into.
        targets: Vec<RoomId>,
    },

    /// Favorite or unfavorite a message for the current user.
    ToggleFavorite {
        /// Message to toggle.
        message_id: MessageId,
    },

    /// Open (or create) a direct chat with another user.
    StartDirectChat {
        /// The other participant.
        peer_id: UserId,
        /// Name to show until the server room arrives.
        peer_name: String,
    },

    /// Create a group chat.
    CreateGroup {
        /// Group name.
        name: String,
        /// Other members. The current user is always included.
        member_ids: Vec<UserId>,
    },

    /// Fetch a room's history again (retry after `LoadFailed`).
    Reload {
        /// Room to reload.
        room_id: RoomId,
    },

    /// Result of a [`ClientAction::LoadHistory`].
    HistoryLoaded {
        /// Room the history belongs to.
        room_id: RoomId,
        /// Messages in server order, or the error text.
        result: Result<Vec<Message>, String>,
    },

    /// Bytes written for a [`ClientAction::Upload`].
    UploadProgress {
        /// Batch being uploaded.
        batch_id: u64,
        /// Bytes written so far, across all files.
        sent: u64,
        /// Total bytes in the request body.
        total: u64,
    },

    /// Result of a [`ClientAction::Upload`].
    UploadCompleted {
        /// Batch that finished.
        batch_id: u64,
        /// Server attachments, or the error text.
        result: Result<Vec<Attachment>, String>,
    },

    /// Result of a [`ClientAction::SetFavorite`].
    FavoriteCompleted {
        /// Message that was toggled.
        message_id: MessageId,
        /// Requested state.
        favorite: bool,
        /// Success, or the error text.
        result: Result<(), String>,
    },
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Open a WebSocket to `url`. Any previous transport has been closed by
    /// an earlier `CloseTransport`.
    OpenTransport {
        /// Engine.IO WebSocket endpoint.
        url: Url,
    },

    /// Close the transport.
    CloseTransport {
        /// Why.
        reason: String,
    },

    /// Write a text frame to the transport.
    SendFrame(String),

    /// `GET /api/rooms/{room_id}/messages`, then feed back
    /// [`ClientEvent::HistoryLoaded`].
    LoadHistory {
        /// Room to load.
        room_id: RoomId,
    },

    /// `POST /api/upload` with every file in one multipart body, feeding back
    /// [`ClientEvent::UploadProgress`] and then [`ClientEvent::UploadCompleted`].
    Upload {
        /// Correlation id for the feedback events.
        batch_id: u64,
        /// Files to upload.
        files: Vec<LocalFile>,
    },

    /// `POST /api/messages/{id}/favorite` or `/unfavorite`, then feed back
    /// [`ClientEvent::FavoriteCompleted`].
    SetFavorite {
        /// Message to toggle.
        message_id: MessageId,
        /// Target state.
        favorite: bool,
    },

    /// Something the presentation layer should re-read.
    Notify(Notice),
}

/// State-change notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The `connected` signal changed. Send controls follow it.
    ConnectionChanged {
        /// New value.
        connected: bool,
    },
    /// Room list, previews or unread counts changed.
    RoomsChanged,
    /// Focus moved.
    FocusChanged {
        /// Newly focused room, `None` after leaving the focused room.
        room_id: Option<RoomId>,
    },
    /// A room's timeline changed.
    TimelineChanged {
        /// Room whose messages changed.
        room_id: RoomId,
    },
    /// A room's typing list changed.
    TypingChanged {
        /// Room whose typing list changed.
        room_id: RoomId,
    },
    /// The user directory or someone's online state changed.
    PresenceChanged,
    /// Aggregate upload progress for a batch.
    UploadProgress {
        /// Batch being uploaded.
        batch_id: u64,
        /// Percentage, 0 to 100.
        percent: u8,
    },
    /// A user-visible failure.
    Failure(ChatFailure),
}
