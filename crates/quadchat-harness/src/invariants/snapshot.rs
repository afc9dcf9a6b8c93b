//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture what a user could see at one point in time. Invariants
//! operate on snapshots rather than live clients so every check sees one
//! consistent state.

use std::collections::BTreeMap;

use quadchat_client::Client;
use quadchat_core::Environment;
use quadchat_proto::{Message, MessageId, MessageStatus, RoomId, UserId};

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Create a snapshot from multiple clients.
    pub fn from_clients(clients: Vec<ClientSnapshot>) -> Self {
        Self { clients }
    }
}

/// Snapshot of a single client's observable state.
#[derive(Debug, Clone, Default)]
pub struct ClientSnapshot {
    /// Position of the client in its world.
    pub id: usize,
    /// Signed-in user.
    pub user_id: Option<UserId>,
    /// The `connected` signal.
    pub connected: bool,
    /// Focused room.
    pub focused_room: Option<RoomId>,
    /// Rooms in the list.
    pub rooms: BTreeMap<RoomId, RoomSnapshot>,
    /// Every upload percentage reported, per batch, in order.
    pub progress_history: BTreeMap<u64, Vec<u8>>,
}

impl ClientSnapshot {
    /// Create an empty client snapshot.
    pub fn new(id: usize) -> Self {
        Self { id, ..Default::default() }
    }

    /// Capture a live client.
    pub fn capture<E: Environment>(id: usize, client: &Client<E>) -> Self {
        let tracker = client.rooms();
        let rooms = tracker
            .rooms()
            .iter()
            .map(|room| {
                let messages = client
                    .timeline(&room.id)
                    .map(|t| t.messages().iter().map(MessageSnapshot::from).collect())
                    .unwrap_or_default();
                let typing = client
                    .presence()
                    .typing_in(&room.id)
                    .iter()
                    .map(|t| t.user_id.clone())
                    .collect();
                let snapshot = RoomSnapshot {
                    joined: tracker.is_joined(&room.id),
                    unread_count: room.unread_count,
                    messages,
                    typing,
                };
                (room.id.clone(), snapshot)
            })
            .collect();

        Self {
            id,
            user_id: client.identity().map(|i| i.id.clone()),
            connected: client.is_connected(),
            focused_room: client.focused_room().cloned(),
            rooms,
            progress_history: BTreeMap::new(),
        }
    }

    /// Attach recorded upload progress.
    #[must_use]
    pub fn with_progress(mut self, history: BTreeMap<u64, Vec<u8>>) -> Self {
        self.progress_history = history;
        self
    }

    /// Set focused room.
    #[must_use]
    pub fn with_focused_room(mut self, room_id: Option<RoomId>) -> Self {
        self.focused_room = room_id;
        self
    }

    /// Add a room to the snapshot.
    #[must_use]
    pub fn with_room(mut self, room_id: impl Into<RoomId>, snapshot: RoomSnapshot) -> Self {
        self.rooms.insert(room_id.into(), snapshot);
        self
    }
}

/// Snapshot of one room as a client sees it.
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    /// Whether the client joined the room on the channel.
    pub joined: bool,
    /// Unread badge.
    pub unread_count: u32,
    /// Timeline, in display order.
    pub messages: Vec<MessageSnapshot>,
    /// Users shown as typing.
    pub typing: Vec<UserId>,
}

impl RoomSnapshot {
    /// Joined room with the given messages.
    pub fn joined_with(messages: impl IntoIterator<Item = MessageSnapshot>) -> Self {
        Self { joined: true, messages: messages.into_iter().collect(), ..Default::default() }
    }
}

/// The parts of a message invariants look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSnapshot {
    /// Server id, or temp id while unconfirmed.
    pub id: MessageId,
    /// Delivery status.
    pub status: MessageStatus,
    /// Author.
    pub sender_id: UserId,
    /// Temp id echoed by the server.
    pub client_temp_id: Option<MessageId>,
}

impl MessageSnapshot {
    /// Message with no echoed temp id.
    pub fn new(id: &str, status: MessageStatus, sender_id: &str) -> Self {
        Self { id: id.into(), status, sender_id: sender_id.into(), client_temp_id: None }
    }
}

impl From<&Message> for MessageSnapshot {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            status: message.status,
            sender_id: message.sender_id.clone(),
            client_temp_id: message.client_temp_id.clone(),
        }
    }
}
