//! User intents.
//!
//! [`Command`] is what a frontend produces from user input. Most commands
//! map one-to-one onto a [`ClientEvent`]; downloads and quitting are
//! handled by the runtime itself.

use quadchat_client::{ClientEvent, LocalFile};
use quadchat_proto::{MessageId, RoomId, UserId};

/// A user intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Open a room.
    Focus {
        /// Room to open.
        room_id: RoomId,
    },
    /// Leave a room.
    Leave {
        /// Room to leave.
        room_id: RoomId,
    },
    /// A key was pressed in the composer.
    Keystroke,
    /// Send to the focused room.
    Send {
        /// Message text.
        content: String,
        /// Files to attach.
        files: Vec<LocalFile>,
        /// Message being replied to.
        reply_to: Option<MessageId>,
    },
    /// Retry a failed message.
    Resend {
        /// Temp id of the failed message.
        temp_id: MessageId,
    },
    /// Drop a failed message.
    Discard {
        /// Temp id of the failed message.
        temp_id: MessageId,
    },
    /// Copy a message into other rooms.
    Forward {
        /// Message to copy.
        message_id: MessageId,
        /// Destination rooms.
        targets: Vec<RoomId>,
    },
    /// Toggle the current user's favorite on a message.
    ToggleFavorite {
        /// Message to toggle.
        message_id: MessageId,
    },
    /// Open or create a direct chat.
    DirectChat {
        /// Other participant.
        peer_id: UserId,
        /// Name shown until the server confirms the room.
        peer_name: String,
    },
    /// Create a group chat.
    CreateGroup {
        /// Group name.
        name: String,
        /// Members besides the current user.
        member_ids: Vec<UserId>,
    },
    /// Fetch a room's history again.
    Reload {
        /// Room to reload.
        room_id: RoomId,
    },
    /// Save one attachment of a message locally.
    Download {
        /// Message carrying the attachment.
        message_id: MessageId,
        /// Zero-based attachment index.
        index: usize,
    },
    /// Sign out and stop the runtime.
    Quit,
}

impl Command {
    /// The client event for this command, or the command back if the
    /// runtime handles it itself.
    pub fn into_client_event<I>(self) -> Result<ClientEvent<I>, Self> {
        Ok(match self {
            Self::Focus { room_id } => ClientEvent::Focus { room_id },
            Self::Leave { room_id } => ClientEvent::Leave { room_id },
            Self::Keystroke => ClientEvent::Keystroke,
            Self::Send { content, files, reply_to } => {
                ClientEvent::Send { content, files, reply_to }
            },
            Self::Resend { temp_id } => ClientEvent::Resend { temp_id },
            Self::Discard { temp_id } => ClientEvent::Discard { temp_id },
            Self::Forward { message_id, targets } => ClientEvent::Forward { message_id, targets },
            Self::ToggleFavorite { message_id } => ClientEvent::ToggleFavorite { message_id },
            Self::DirectChat { peer_id, peer_name } => {
                ClientEvent::StartDirectChat { peer_id, peer_name }
            },
            Self::CreateGroup { name, member_ids } => ClientEvent::CreateGroup { name, member_ids },
            Self::Reload { room_id } => ClientEvent::Reload { room_id },
            other @ (Self::Download { .. } | Self::Quit) => return Err(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn client_commands_translate() {
        let event = Command::Focus { room_id: "r1".into() }.into_client_event::<Duration>();
        assert!(matches!(event, Ok(ClientEvent::Focus { room_id }) if room_id == "r1"));

        let event = Command::DirectChat { peer_id: "bo".into(), peer_name: "Bo".into() }
            .into_client_event::<Duration>();
        assert!(matches!(event, Ok(ClientEvent::StartDirectChat { .. })));
    }

    #[test]
    fn runtime_commands_come_back() {
        let download = Command::Download { message_id: "m1".into(), index: 0 };
        assert_eq!(download.clone().into_client_event::<Duration>().err(), Some(download));
        assert_eq!(Command::Quit.into_client_event::<Duration>().err(), Some(Command::Quit));
    }
}
