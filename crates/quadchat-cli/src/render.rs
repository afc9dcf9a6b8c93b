//! Text rendering of client notices.

use std::collections::HashMap;

use quadchat_client::{Client, Environment, Notice, TypingSummary};
use quadchat_proto::{Message, MessageId, MessageStatus, RoomId};

/// Turns notices into output lines.
///
/// Remembers what was printed so a timeline change only shows messages that
/// are new or changed status. A pending message and its confirmed copy share
/// a key, the temp id.
#[derive(Debug, Default)]
pub struct Presenter {
    shown: HashMap<RoomId, HashMap<MessageId, MessageStatus>>,
}

impl Presenter {
    /// Empty presenter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines to print for `notice`, given the client state after it.
    pub fn lines<E: Environment>(&mut self, client: &Client<E>, notice: &Notice) -> Vec<String> {
        match notice {
            Notice::ConnectionChanged { connected: true } => vec!["* connected".into()],
            Notice::ConnectionChanged { connected: false } => {
                vec!["* offline, sending is paused".into()]
            },
            Notice::FocusChanged { room_id: Some(room_id) } => {
                let name = client
                    .rooms()
                    .get(room_id)
                    .map_or(room_id.as_str(), |r| r.display_name.as_str());
                vec![format!("== {name} ({room_id}) ==")]
            },
            Notice::FocusChanged { room_id: None } => vec!["* no room open".into()],
            Notice::TimelineChanged { room_id } if client.focused_room() == Some(room_id) => {
                let Some(timeline) = client.timeline(room_id) else {
                    return Vec::new();
                };
                let shown = self.shown.entry(room_id.clone()).or_default();
                timeline
                    .messages()
                    .iter()
                    .filter(|m| shown.insert(display_key(m).clone(), m.status) != Some(m.status))
                    .map(format_message)
                    .collect()
            },
            Notice::TypingChanged { room_id } if client.focused_room() == Some(room_id) => {
                typing_line(&client.typing_summary(room_id)).into_iter().collect()
            },
            Notice::UploadProgress { batch_id, percent } => {
                vec![format!("* upload {batch_id}: {percent}%")]
            },
            Notice::Failure(failure) => vec![format!("! {failure}")],
            Notice::RoomsChanged
            | Notice::PresenceChanged
            | Notice::TimelineChanged { .. }
            | Notice::TypingChanged { .. } => Vec::new(),
        }
    }
}

fn display_key(message: &Message) -> &MessageId {
    message.client_temp_id.as_ref().unwrap_or(&message.id)
}

/// One message as a line: time, author, text, attachments, and a marker
/// for anything not yet sent.
pub fn format_message(message: &Message) -> String {
    let author = message.sender_name.as_deref().unwrap_or(&message.sender_id);
    let mut line = format!("[{}] {author}: ", message.created_at.format("%H:%M"));
    if message.forwarded {
        line.push_str("(fwd) ");
    }
    line.push_str(&message.content);
    for attachment in &message.attachments {
        line.push_str(&format!(" [{}]", attachment.filename));
    }
    match message.status {
        MessageStatus::Sent => line.push_str(&format!("  <{}>", message.id)),
        MessageStatus::Pending => line.push_str("  (sending)"),
        MessageStatus::Failed => line.push_str(&format!("  (failed, /resend {})", message.id)),
    }
    line
}

/// Typing indicator line, if anyone is typing.
pub fn typing_line(summary: &TypingSummary) -> Option<String> {
    (!summary.is_empty()).then(|| format!("* {summary}"))
}
