//! Room membership tracker.
//!
//! Holds the room list in display order, the set of rooms joined on the
//! channel, and the single focused room. Joining controls server-side routing
//! and notification eligibility; focus is what the user is looking at.
//!
//! Rooms created locally ("start chat", "create group") get a placeholder id
//! until the server announces the real room with `room-upsert`. Placeholders
//! are matched to server rooms by a merge key:
//!
//! - direct chat: the sorted member pair
//! - group: display name plus member set
//!
//! # Invariants
//!
//! - At most one room is focused, and a focused room is always joined.
//! - Room ids in the list are unique.

use std::collections::BTreeSet;

use quadchat_proto::{Message, Room, RoomId, UserId};

/// Prefix of optimistic direct-chat ids.
pub const DIRECT_ROOM_PREFIX: &str = "dm-";

/// Prefix of optimistic group ids.
pub const GROUP_ROOM_PREFIX: &str = "group-";

/// Placeholder id for the direct chat between `a` and `b`.
///
/// Order-independent: both participants derive the same id.
pub fn direct_room_id(a: &str, b: &str) -> RoomId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{DIRECT_ROOM_PREFIX}{lo}-{hi}")
}

/// Placeholder id for a group created at `millis` (Unix epoch).
pub fn group_room_id(millis: i64) -> RoomId {
    format!("{GROUP_ROOM_PREFIX}{millis}")
}

/// Whether `id` was minted locally.
pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(DIRECT_ROOM_PREFIX) || id.starts_with(GROUP_ROOM_PREFIX)
}

/// Identity of a conversation independent of its id.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MergeKey<'a> {
    Direct(&'a UserId, &'a UserId),
    Group(&'a str, &'a BTreeSet<UserId>),
}

fn merge_key(room: &Room) -> Option<MergeKey<'_>> {
    if room.is_group {
        return Some(MergeKey::Group(room.display_name.as_str(), &room.member_ids));
    }
    let mut members = room.member_ids.iter();
    match (members.next(), members.next(), members.next()) {
        // BTreeSet iteration is sorted, so the pair is canonical.
        (Some(a), Some(b), None) => Some(MergeKey::Direct(a, b)),
        _ => None,
    }
}

/// What `upsert` did with a server room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Same id already present; fields updated.
    Merged,
    /// Replaced the optimistic room with this placeholder id.
    Superseded {
        /// Id the room had before.
        placeholder: RoomId,
    },
    /// New room at the head of the list.
    Inserted,
}

/// Result of changing focus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusChange {
    /// Room focused before, if different from the new one.
    pub previous: Option<RoomId>,
    /// Whether the room was not joined before.
    pub newly_joined: bool,
}

/// Room list, joined set and focus.
#[derive(Debug, Clone, Default)]
pub struct RoomTracker {
    rooms: Vec<Room>,
    joined: BTreeSet<RoomId>,
    focused: Option<RoomId>,
}

impl RoomTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rooms in display order (most recently added first).
    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Room by id.
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    fn get_mut(&mut self, room_id: &str) -> Option<&mut Room> {
        self.rooms.iter_mut().find(|r| r.id == room_id)
    }

    /// Whether the room is in the list.
    pub fn contains(&self, room_id: &str) -> bool {
        self.get(room_id).is_some()
    }

    /// Focused room id.
    pub fn focused(&self) -> Option<&RoomId> {
        self.focused.as_ref()
    }

    /// Whether `room_id` is the focused room.
    pub fn is_focused(&self, room_id: &str) -> bool {
        self.focused.as_deref() == Some(room_id)
    }

    /// Whether the room is joined on the channel.
    pub fn is_joined(&self, room_id: &str) -> bool {
        self.joined.contains(room_id)
    }

    /// Joined rooms.
    pub fn joined(&self) -> impl Iterator<Item = &RoomId> {
        self.joined.iter()
    }

    /// Existing direct room between `a` and `b`, placeholder or server.
    pub fn find_direct(&self, a: &str, b: &str) -> Option<&Room> {
        self.rooms.iter().find(|r| {
            !r.is_group
                && r.member_ids.len() == 2
                && r.member_ids.contains(a)
                && r.member_ids.contains(b)
        })
    }

    /// Add a locally created room at the head. Returns false if the id
    /// already exists.
    pub fn insert_optimistic(&mut self, room: Room) -> bool {
        if self.contains(&room.id) {
            return false;
        }
        self.rooms.insert(0, room);
        true
    }

    /// Apply a server room announcement.
    pub fn upsert(&mut self, room: Room) -> UpsertOutcome {
        if let Some(existing) = self.get_mut(&room.id) {
            existing.is_group = room.is_group;
            existing.display_name = room.display_name;
            existing.member_ids = room.member_ids;
            if room.last_message.is_some() {
                existing.last_message = room.last_message;
            }
            return UpsertOutcome::Merged;
        }

        let placeholder_index = merge_key(&room).and_then(|key| {
            self.rooms
                .iter()
                .position(|r| is_placeholder_id(&r.id) && merge_key(r).as_ref() == Some(&key))
        });

        let Some(index) = placeholder_index else {
            self.rooms.insert(0, room);
            return UpsertOutcome::Inserted;
        };

        let placeholder = std::mem::replace(&mut self.rooms[index], room);
        let current = &mut self.rooms[index];
        current.unread_count = current.unread_count.max(placeholder.unread_count);
        if current.last_message.is_none() {
            current.last_message = placeholder.last_message;
        }

        if self.joined.remove(&placeholder.id) {
            self.joined.insert(current.id.clone());
        }
        if self.focused.as_deref() == Some(placeholder.id.as_str()) {
            self.focused = Some(current.id.clone());
        }

        UpsertOutcome::Superseded { placeholder: placeholder.id }
    }

    /// Focus `room_id`, joining it if needed, and clear its unread count.
    ///
    /// Returns `None` if the room is not in the list.
    pub fn focus(&mut self, room_id: &str) -> Option<FocusChange> {
        let room = self.get_mut(room_id)?;
        room.unread_count = 0;

        let newly_joined = self.joined.insert(room_id.to_string());
        let previous = self.focused.replace(room_id.to_string()).filter(|p| p != room_id);
        Some(FocusChange { previous, newly_joined })
    }

    /// Leave the room. Clears focus if it was focused. Returns whether it
    /// was joined.
    pub fn leave(&mut self, room_id: &str) -> bool {
        if self.focused.as_deref() == Some(room_id) {
            self.focused = None;
        }
        self.joined.remove(room_id)
    }

    /// Record a message in the room's preview. Counts it as unread when
    /// `unread` is set.
    pub fn record_message(&mut self, room_id: &str, message: &Message, unread: bool) {
        if let Some(room) = self.get_mut(room_id) {
            room.last_message = Some(message.clone());
            if unread {
                room.unread_count = room.unread_count.saturating_add(1);
            }
        }
    }

    /// Replace the preview if it still shows the message with `old_id`.
    pub fn replace_last_message(&mut self, room_id: &str, old_id: &str, message: &Message) {
        if let Some(room) = self.get_mut(room_id)
            && room.last_message.as_ref().is_some_and(|m| m.id == old_id)
        {
            room.last_message = Some(message.clone());
        }
    }

    /// Drop everything (sign-out or identity change).
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.joined.clear();
        self.focused = None;
    }
}
