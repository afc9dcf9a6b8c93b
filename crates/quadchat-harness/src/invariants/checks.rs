//! Standard invariant checks.
//!
//! Each check walks the snapshot and reports the first place its property
//! fails.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use quadchat_proto::{MessageId, MessageStatus, RoomId};

use super::{Invariant, InvariantKind, SystemSnapshot, Violation};

/// The focused room must be listed and joined.
///
/// Focusing joins the room on the channel. A focused room that is missing
/// from the list or was never joined would show a conversation that receives
/// no live messages.
pub struct FocusedRoomJoined;

impl Invariant for FocusedRoomJoined {
    fn kind(&self) -> InvariantKind {
        InvariantKind::FocusedRoomJoined
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            let Some(focused) = &client.focused_room else { continue };
            let detail = match client.rooms.get(focused) {
                Some(room) if room.joined => continue,
                Some(_) => "focused but not joined".to_string(),
                None => format!("focused but not listed in {:?}", client.rooms.keys()),
            };
            return Err(Violation::new(self.kind(), detail).on_client(client.id).in_room(focused));
        }
        Ok(())
    }
}

/// A timeline never holds two messages with the same id.
pub struct UniqueMessageIds;

impl Invariant for UniqueMessageIds {
    fn kind(&self) -> InvariantKind {
        InvariantKind::UniqueMessageIds
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            for (room_id, room) in &client.rooms {
                let mut seen = HashSet::new();
                if let Some(repeat) = room.messages.iter().find(|m| !seen.insert(&m.id)) {
                    let detail = format!("message {} appears twice", repeat.id);
                    return Err(Violation::new(self.kind(), detail)
                        .on_client(client.id)
                        .in_room(room_id));
                }
            }
        }
        Ok(())
    }
}

/// A confirmed message never coexists with its optimistic copy.
///
/// Once the server's copy (carrying the sender's temp id) is in a timeline,
/// no message may still use that temp id as its own id, and no two server
/// copies may claim the same temp id.
pub struct NoEchoDuplicates;

impl Invariant for NoEchoDuplicates {
    fn kind(&self) -> InvariantKind {
        InvariantKind::NoEchoDuplicates
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            for (room_id, room) in &client.rooms {
                let ids: HashSet<&MessageId> = room.messages.iter().map(|m| &m.id).collect();
                let mut claimed = HashSet::new();

                for message in &room.messages {
                    let Some(temp_id) = &message.client_temp_id else { continue };
                    if *temp_id == message.id {
                        continue;
                    }
                    let detail = if ids.contains(temp_id) {
                        format!("{} shown beside its optimistic copy {temp_id}", message.id)
                    } else if !claimed.insert(temp_id) {
                        format!("temp id {temp_id} confirmed twice")
                    } else {
                        continue;
                    };
                    return Err(Violation::new(self.kind(), detail)
                        .on_client(client.id)
                        .in_room(room_id));
                }
            }
        }
        Ok(())
    }
}

/// Only the signed-in user's own messages can be pending or failed.
///
/// Everything received from the server is sent by definition.
pub struct LocalStatusOwnership;

impl Invariant for LocalStatusOwnership {
    fn kind(&self) -> InvariantKind {
        InvariantKind::LocalStatusOwnership
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            for (room_id, room) in &client.rooms {
                let foreign = room.messages.iter().find(|m| {
                    m.status != MessageStatus::Sent && client.user_id.as_ref() != Some(&m.sender_id)
                });
                if let Some(message) = foreign {
                    let (id, sender) = (&message.id, &message.sender_id);
                    let detail = format!("{id} from {sender} is {:?}", message.status);
                    return Err(Violation::new(self.kind(), detail)
                        .on_client(client.id)
                        .in_room(room_id));
                }
            }
        }
        Ok(())
    }
}

/// A user never sees themselves in a typing list.
pub struct TypingExcludesSelf;

impl Invariant for TypingExcludesSelf {
    fn kind(&self) -> InvariantKind {
        InvariantKind::TypingExcludesSelf
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            let Some(me) = &client.user_id else { continue };
            if let Some((room_id, _)) = client.rooms.iter().find(|(_, r)| r.typing.contains(me)) {
                return Err(Violation::new(self.kind(), format!("{me} shown typing"))
                    .on_client(client.id)
                    .in_room(room_id));
            }
        }
        Ok(())
    }
}

/// The focused room has no unread badge.
pub struct FocusedRoomRead;

impl Invariant for FocusedRoomRead {
    fn kind(&self) -> InvariantKind {
        InvariantKind::FocusedRoomRead
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            let Some(focused) = &client.focused_room else { continue };
            if let Some(room) = client.rooms.get(focused)
                && room.unread_count != 0
            {
                let detail = format!("focused room shows {} unread", room.unread_count);
                return Err(Violation::new(self.kind(), detail)
                    .on_client(client.id)
                    .in_room(focused));
            }
        }
        Ok(())
    }
}

/// Upload percentages strictly increase, never exceed 100, and 100 is only
/// ever the last report of a batch.
pub struct ProgressMonotonicity;

impl Invariant for ProgressMonotonicity {
    fn kind(&self) -> InvariantKind {
        InvariantKind::ProgressMonotonicity
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        for client in &state.clients {
            for (batch_id, history) in &client.progress_history {
                let detail = if let Some(over) = history.iter().find(|p| **p > 100) {
                    format!("batch {batch_id} reported {over}%")
                } else if let Some(pair) =
                    history.windows(2).find(|pair| pair[1] <= pair[0] || pair[0] == 100)
                {
                    format!("batch {batch_id} went {}% then {}%", pair[0], pair[1])
                } else {
                    continue;
                };
                return Err(Violation::new(self.kind(), detail).on_client(client.id));
            }
        }
        Ok(())
    }
}

/// Connected clients focused on the same room agree on which of its messages
/// were sent.
///
/// Order is not compared: a sender keeps its message where it composed it,
/// even if another message reached the server first. Only meaningful once no
/// frames or HTTP responses are in flight; a message on its way to one client
/// is legitimately missing from its timeline.
pub struct SentMessagesConverge;

impl Invariant for SentMessagesConverge {
    fn kind(&self) -> InvariantKind {
        InvariantKind::SentMessagesConverge
    }

    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation> {
        let mut views: BTreeMap<&RoomId, Vec<(usize, BTreeSet<&MessageId>)>> = BTreeMap::new();
        for client in state.clients.iter().filter(|c| c.connected) {
            let Some(focused) = &client.focused_room else { continue };
            let Some(room) = client.rooms.get(focused) else { continue };
            let sent = room
                .messages
                .iter()
                .filter(|m| m.status == MessageStatus::Sent)
                .map(|m| &m.id)
                .collect();
            views.entry(focused).or_default().push((client.id, sent));
        }

        for (room_id, clients) in views {
            let Some(((first_id, first), rest)) = clients.split_first() else { continue };
            if let Some((client_id, sent)) = rest.iter().find(|(_, sent)| sent != first) {
                let detail =
                    format!("client {first_id} sees {first:?}, client {client_id} sees {sent:?}");
                return Err(Violation::new(self.kind(), detail).in_room(room_id));
            }
        }
        Ok(())
    }
}
