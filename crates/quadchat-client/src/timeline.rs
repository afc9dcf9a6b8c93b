//! Per-room message timeline.
//!
//! An insertion-ordered, id-deduplicated list of messages. Optimistic sends
//! sit in the list under a temp id until the acknowledgement swaps in the
//! server copy at the same position.
//!
//! # Invariants
//!
//! - Ids are unique within a timeline.
//! - Order is arrival/send order. Nothing here sorts by `created_at`.
//! - Every lookup is by id. Positions shift under concurrent appends.
//! - A pending message leaves `Pending` at most once per attempt: to `Sent`
//!   (id swapped) or to `Failed` (temp id kept).
//! - A message that arrived while history was loading survives the reload,
//!   even when the server's snapshot was taken before it.

use std::collections::HashSet;

use quadchat_proto::{Message, MessageId, MessageStatus, ReplyPreview};

/// Characters kept in a reply preview built from the timeline.
pub const REPLY_SNIPPET_CHARS: usize = 80;

/// History fetch state for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    /// Never requested.
    #[default]
    NotLoaded,
    /// Request in flight.
    Loading,
    /// History replaced from the server.
    Loaded,
    /// Last request failed. A reload retries.
    Failed(String),
}

/// What `append` did with a pushed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New message at the tail.
    Inserted,
    /// Id already present; timeline unchanged.
    Duplicate,
    /// Matched an unresolved (pending or failed) message by its echoed temp
    /// id and replaced it in place.
    Reconciled {
        /// Temp id that was replaced.
        temp_id: MessageId,
    },
}

/// Result of applying a positive acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmed {
    /// The server copy had already arrived by push and was folded into the
    /// optimistic slot.
    pub folded_push: bool,
}

/// Messages of one room.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    load_state: LoadState,
    /// Ids pushed or acknowledged since the in-flight history request.
    arrived_while_loading: HashSet<MessageId>,
}

impl Timeline {
    /// Empty, not loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether there are no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// History fetch state.
    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    /// Record a history request or failure.
    pub fn set_load_state(&mut self, state: LoadState) {
        if state == LoadState::Loading && self.load_state != LoadState::Loading {
            self.arrived_while_loading.clear();
        }
        self.load_state = state;
    }

    /// Position of `id`.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Message by id.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Mutable message by id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Whether `id` is present.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Last message, for room previews.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Add an optimistic message at the tail.
    pub fn push_local(&mut self, message: Message) {
        debug_assert!(message.has_temp_id());
        debug_assert!(!self.contains(&message.id));
        self.messages.push(message);
    }

    /// Apply a pushed message.
    ///
    /// An echo also supersedes a message that already failed: the server
    /// stored it, so the failed copy would only invite a duplicate resend.
    pub fn append(&mut self, mut message: Message) -> AppendOutcome {
        if self.contains(&message.id) {
            return AppendOutcome::Duplicate;
        }

        let echoed = message.client_temp_id.as_deref().and_then(|temp| {
            self.messages.iter().position(|m| m.id == temp && m.status != MessageStatus::Sent)
        });

        message.status = MessageStatus::Sent;
        self.note_arrival(&message.id);
        match echoed {
            Some(index) => {
                let temp_id = std::mem::replace(&mut self.messages[index], message).id;
                let new_id = self.messages[index].id.clone();
                self.rewrite_reply_refs(&temp_id, &new_id);
                AppendOutcome::Reconciled { temp_id }
            },
            None => {
                self.messages.push(message);
                AppendOutcome::Inserted
            },
        }
    }

    /// Apply a positive ack: the message under `temp_id` becomes `server`,
    /// same position, status `Sent`.
    ///
    /// If the server copy is already in the list (push beat the ack), that
    /// copy is removed so the message appears once, in the slot the user
    /// placed it. Returns `None` if `temp_id` is not pending here.
    pub fn confirm(&mut self, temp_id: &str, mut server: Message) -> Option<Confirmed> {
        let mut index = self.pending_index(temp_id)?;

        let mut folded_push = false;
        if server.id != temp_id
            && let Some(dup) = self.position(&server.id)
        {
            self.messages.remove(dup);
            folded_push = true;
            if dup < index {
                index -= 1;
            }
        }

        let local = &self.messages[index];
        server.status = MessageStatus::Sent;
        server.client_temp_id = Some(temp_id.to_string());
        if server.reply_to_id.is_none() {
            server.reply_to_id.clone_from(&local.reply_to_id);
        }
        if server.reply_preview.is_none() {
            server.reply_preview.clone_from(&local.reply_preview);
        }
        server.forwarded |= local.forwarded;

        let new_id = server.id.clone();
        self.messages[index] = server;
        self.rewrite_reply_refs(temp_id, &new_id);
        self.note_arrival(&new_id);
        Some(Confirmed { folded_push })
    }

    /// Negative ack or timeout. Returns false if `temp_id` is not pending.
    pub fn fail(&mut self, temp_id: &str) -> bool {
        match self.pending_index(temp_id) {
            Some(index) => {
                self.messages[index].status = MessageStatus::Failed;
                true
            },
            None => false,
        }
    }

    /// Put a failed message back to `Pending` for another attempt.
    ///
    /// # Errors
    ///
    /// The message's current status if it is not `Failed`, `None` if absent.
    pub fn retry(&mut self, temp_id: &str) -> Result<&Message, Option<MessageStatus>> {
        let message = self.get_mut(temp_id).ok_or(None)?;
        if message.status != MessageStatus::Failed {
            return Err(Some(message.status));
        }
        message.status = MessageStatus::Pending;
        Ok(message)
    }

    /// Remove a failed message.
    ///
    /// # Errors
    ///
    /// The message's current status if it is not `Failed`, `None` if absent.
    pub fn discard(&mut self, temp_id: &str) -> Result<Message, Option<MessageStatus>> {
        let index = self.position(temp_id).ok_or(None)?;
        let status = self.messages[index].status;
        if status != MessageStatus::Failed {
            return Err(Some(status));
        }
        Ok(self.messages.remove(index))
    }

    /// Replace the list with fetched history.
    ///
    /// Local unresolved messages (pending or failed) stay at the tail unless
    /// the history already contains their server copy. So do confirmed
    /// messages that arrived after the request went out and are missing
    /// from the snapshot. Returns the temp ids absorbed by the history;
    /// those sends are settled.
    pub fn replace_history(&mut self, history: Vec<Message>) -> Vec<MessageId> {
        let mut fresh: Vec<Message> = Vec::with_capacity(history.len());
        for mut message in history {
            if fresh.iter().any(|m| m.id == message.id) {
                continue;
            }
            if message.status == MessageStatus::Pending {
                message.status = MessageStatus::Sent;
            }
            fresh.push(message);
        }
        let history_len = fresh.len();

        let mut absorbed = Vec::new();
        for local in std::mem::take(&mut self.messages) {
            let in_history = fresh[..history_len].iter().any(|m| same_message(m, &local));
            match local.status {
                MessageStatus::Sent => {
                    if !in_history && self.arrived_while_loading.contains(&local.id) {
                        fresh.push(local);
                    }
                },
                MessageStatus::Pending if in_history => absorbed.push(local.id),
                MessageStatus::Failed if in_history => {},
                MessageStatus::Pending | MessageStatus::Failed => fresh.push(local),
            }
        }

        self.messages = fresh;
        self.load_state = LoadState::Loaded;
        self.arrived_while_loading.clear();
        absorbed
    }

    /// Display preview for the message `message` replies to: the referenced
    /// message if it is in this timeline, else the snippet delivered with
    /// the reference.
    pub fn resolve_reply(&self, message: &Message) -> Option<ReplyPreview> {
        let target = message.reply_to_id.as_deref()?;
        match self.get(target) {
            Some(found) => Some(found.reply_preview(REPLY_SNIPPET_CHARS)),
            None => message.reply_preview.clone(),
        }
    }

    /// Add or remove `user_id` in the message's `favorited_by`. Returns
    /// whether the message was found.
    pub fn set_favorite(&mut self, message_id: &str, user_id: &str, favorite: bool) -> bool {
        let Some(message) = self.get_mut(message_id) else {
            return false;
        };
        if favorite {
            message.favorited_by.insert(user_id.to_string());
        } else {
            message.favorited_by.remove(user_id);
        }
        true
    }

    /// Move every message to `room_id` (room superseded by server copy).
    pub fn set_room_id(&mut self, room_id: &str) {
        for message in &mut self.messages {
            room_id.clone_into(&mut message.room_id);
        }
    }

    /// Append the messages of `other` that are not already present.
    pub fn absorb(&mut self, other: Timeline) {
        for message in other.messages {
            if !self.contains(&message.id) {
                self.messages.push(message);
            }
        }
    }

    fn note_arrival(&mut self, id: &str) {
        if self.load_state == LoadState::Loading {
            self.arrived_while_loading.insert(id.to_string());
        }
    }

    fn pending_index(&self, temp_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == temp_id && m.status == MessageStatus::Pending)
    }

    fn rewrite_reply_refs(&mut self, old_id: &str, new_id: &str) {
        for message in &mut self.messages {
            if message.reply_to_id.as_deref() == Some(old_id) {
                message.reply_to_id = Some(new_id.to_string());
            }
        }
    }
}

/// Whether `server` is the stored copy of `local`: same id, or the echo of
/// the temp id `local` was sent under.
fn same_message(server: &Message, local: &Message) -> bool {
    if server.id == local.id {
        return true;
    }
    let Some(echoed) = server.client_temp_id.as_deref() else {
        return false;
    };
    echoed == local.id || local.client_temp_id.as_deref() == Some(echoed)
}
