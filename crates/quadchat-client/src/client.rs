//! Client state machine.
//!
//! [`Client`] owns every piece of chat session state for one signed-in user:
//! the connection manager, the room list, one timeline per room, presence,
//! the local typing debouncer, and the sends and uploads still in flight.
//! Each event is processed to completion before `handle` returns, so the
//! caller never observes a half-applied reconciliation.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use chrono::{DateTime, Utc};
use quadchat_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, ConnectionState,
    Environment, SessionContext,
};
use quadchat_proto::{
    Attachment, ClientEmit, EnginePacket, Identity, Message, MessageId, MessageStatus,
    PacketKind, PresenceUpdate, ProtocolError, Room, RoomId, SendAck, SendMessageRequest,
    ServerPush, SocketPacket, TypingNotice, UserId, model::TEMP_MESSAGE_PREFIX,
};

use crate::{
    error::{ChatFailure, ClientError},
    event::{ClientAction, ClientEvent, Notice},
    presence::{
        DEFAULT_TYPING_DISPLAY_CAP, DEFAULT_TYPING_EXPIRY, PresenceAggregator, TypingSummary,
    },
    rooms::{RoomTracker, UpsertOutcome, direct_room_id, group_room_id, is_placeholder_id},
    timeline::{AppendOutcome, LoadState, REPLY_SNIPPET_CHARS, Timeline},
    typing::{DEFAULT_TYPING_QUIET, TypingDebouncer, TypingSignal},
    upload::{LocalFile, ProgressTracker, UploadBatch},
};

/// How long a send waits for its acknowledgement before it is failed.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection manager settings.
    pub connection: ConnectionConfig,
    /// Acknowledgement deadline for `send-message`.
    pub ack_timeout: Duration,
    /// Quiet interval before the local "stopped typing".
    pub typing_quiet: Duration,
    /// Age at which a remote typing entry is dropped.
    pub typing_expiry: Duration,
    /// Names shown in a typing summary.
    pub typing_display_cap: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            typing_quiet: DEFAULT_TYPING_QUIET,
            typing_expiry: DEFAULT_TYPING_EXPIRY,
            typing_display_cap: DEFAULT_TYPING_DISPLAY_CAP,
        }
    }
}

/// A send waiting for its acknowledgement.
#[derive(Debug, Clone)]
struct InFlight<I> {
    room_id: RoomId,
    /// `None` while the send is queued for a connection.
    ack_id: Option<u64>,
    started: I,
    /// Creation order, for flushing queued sends in order.
    seq: u64,
}

/// Chat session client.
pub struct Client<E: Environment> {
    env: E,
    config: ClientConfig,
    connection: Connection<E::Instant>,
    rooms: RoomTracker,
    timelines: HashMap<RoomId, Timeline>,
    presence: PresenceAggregator<E::Instant>,
    typing: TypingDebouncer<E::Instant>,

    /// Pending sends by temp id.
    in_flight: HashMap<MessageId, InFlight<E::Instant>>,
    /// Ack id to temp id, for sends that went out on the wire.
    ack_index: HashMap<u64, MessageId>,
    next_ack_id: u64,
    temp_seq: u64,

    uploads: HashMap<u64, UploadBatch>,
    next_batch_id: u64,

    /// Messages with a favorite request outstanding.
    favorites_in_flight: HashSet<MessageId>,

    /// Last `connected` value announced to the presentation layer.
    online: bool,
}

impl<E: Environment> Client<E> {
    /// Create a signed-out client.
    pub fn new(env: E, config: ClientConfig) -> Self {
        let now = env.now();
        Self {
            connection: Connection::new(now, config.connection.clone()),
            rooms: RoomTracker::new(),
            timelines: HashMap::new(),
            presence: PresenceAggregator::new(),
            typing: TypingDebouncer::new(config.typing_quiet),
            in_flight: HashMap::new(),
            ack_index: HashMap::new(),
            next_ack_id: 0,
            temp_seq: 0,
            uploads: HashMap::new(),
            next_batch_id: 0,
            favorites_in_flight: HashSet::new(),
            online: false,
            env,
            config,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Signed-in identity.
    pub fn identity(&self) -> Option<&Identity> {
        self.connection.session().map(|s| &s.identity)
    }

    /// The `connected` signal. Send controls should follow it.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Connection manager state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Connection manager, for backoff and session inspection.
    pub fn connection(&self) -> &Connection<E::Instant> {
        &self.connection
    }

    /// Room list, joined set and focus.
    pub fn rooms(&self) -> &RoomTracker {
        &self.rooms
    }

    /// Focused room.
    pub fn focused_room(&self) -> Option<&RoomId> {
        self.rooms.focused()
    }

    /// Timeline of a room, if anything was loaded or received for it.
    pub fn timeline(&self, room_id: &str) -> Option<&Timeline> {
        self.timelines.get(room_id)
    }

    /// Message by id, in any room.
    pub fn find_message(&self, message_id: &str) -> Option<&Message> {
        self.timelines.values().find_map(|t| t.get(message_id))
    }

    /// Presence directory and typing lists.
    pub fn presence(&self) -> &PresenceAggregator<E::Instant> {
        &self.presence
    }

    /// Who is typing in `room_id`, capped for display.
    pub fn typing_summary(&self, room_id: &str) -> TypingSummary {
        self.presence.summary(room_id, self.config.typing_display_cap)
    }

    /// Sends waiting for an acknowledgement.
    pub fn pending_sends(&self) -> usize {
        self.in_flight.len()
    }

    /// Last reported percentage of an upload still in progress.
    pub fn upload_progress(&self, batch_id: u64) -> Option<u8> {
        self.uploads.get(&batch_id).and_then(|b| b.tracker.last_reported())
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Malformed frames and caller mistakes (unknown room, invalid
    /// transition). Network outcomes are never errors; they arrive as
    /// [`Notice::Failure`].
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match event {
            ClientEvent::SignIn(session) => self.handle_sign_in(session),
            ClientEvent::SignOut => self.handle_sign_out(),
            ClientEvent::FrameReceived(text) => self.handle_frame(&text),
            ClientEvent::TransportClosed { reason } => {
                let now = self.env.now();
                let actions = self.connection.transport_dropped(&reason, now);
                self.apply_connection(actions)
            },
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::Focus { room_id } => self.handle_focus(room_id),
            ClientEvent::Leave { room_id } => self.handle_leave(room_id),
            ClientEvent::Keystroke => self.handle_keystroke(),
            ClientEvent::Send { content, files, reply_to } => {
                self.handle_send(content, files, reply_to)
            },
            ClientEvent::Resend { temp_id } => self.handle_resend(temp_id),
            ClientEvent::Discard { temp_id } => self.handle_discard(temp_id),
            ClientEvent::Forward { message_id, targets } => {
                self.handle_forward(&message_id, targets)
            },
            ClientEvent::ToggleFavorite { message_id } => self.handle_toggle_favorite(message_id),
            ClientEvent::StartDirectChat { peer_id, peer_name } => {
                self.handle_start_direct_chat(peer_id, peer_name)
            },
            ClientEvent::CreateGroup { name, member_ids } => {
                self.handle_create_group(name, member_ids)
            },
            ClientEvent::Reload { room_id } => self.handle_reload(room_id),
            ClientEvent::HistoryLoaded { room_id, result } => {
                Ok(self.handle_history_loaded(room_id, result))
            },
            ClientEvent::UploadProgress { batch_id, sent, total } => {
                Ok(self.handle_upload_progress(batch_id, sent, total))
            },
            ClientEvent::UploadCompleted { batch_id, result } => {
                self.handle_upload_completed(batch_id, result)
            },
            ClientEvent::FavoriteCompleted { message_id, favorite, result } => {
                Ok(self.handle_favorite_completed(message_id, favorite, result))
            },
        }
    }

    fn handle_sign_in(
        &mut self,
        session: SessionContext,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let previous = self.identity().map(|i| i.id.clone());
        let was_online = self.online;

        if previous.as_ref().is_some_and(|id| *id != session.identity.id) {
            tracing::info!(user = %session.identity.id, "identity changed, dropping session state");
            self.reset();
        }

        tracing::info!(user = %session.identity.id, server = %session.server_url, "signing in");
        let now = self.env.now();
        let opened = self.connection.open(session, now)?;
        let mut actions = self.apply_connection(opened)?;

        if was_online && !self.connection.is_connected() {
            self.online = false;
            actions.insert(0, ClientAction::Notify(Notice::ConnectionChanged { connected: false }));
        }
        Ok(actions)
    }

    fn handle_sign_out(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = Vec::new();
        if let Some(signal) = self.typing.stop() {
            actions.extend(self.emit_typing(signal)?);
        }

        let closing = self.connection.close();
        actions.extend(self.apply_connection(closing)?);
        self.reset();

        if self.online {
            self.online = false;
            actions.push(ClientAction::Notify(Notice::ConnectionChanged { connected: false }));
        }
        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        tracing::info!("signed out");
        Ok(actions)
    }

    fn reset(&mut self) {
        self.rooms.clear();
        self.timelines.clear();
        self.presence.clear();
        self.typing = TypingDebouncer::new(self.config.typing_quiet);
        self.in_flight.clear();
        self.ack_index.clear();
        self.uploads.clear();
        self.favorites_in_flight.clear();
    }

    fn handle_frame(&mut self, text: &str) -> Result<Vec<ClientAction>, ClientError> {
        let packet = EnginePacket::decode(text)?;
        let now = self.env.now();
        let actions = self.connection.handle_packet(packet, now)?;
        self.apply_connection(actions)
    }

    /// Translate connection manager actions into client actions.
    fn apply_connection(
        &mut self,
        actions: Vec<ConnectionAction>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                ConnectionAction::Open { url } => out.push(ClientAction::OpenTransport { url }),
                ConnectionAction::Send(packet) => {
                    out.push(ClientAction::SendFrame(packet.encode()?));
                },
                ConnectionAction::Close { reason } => {
                    out.push(ClientAction::CloseTransport { reason });
                },
                ConnectionAction::Established { sid } => {
                    tracing::info!(%sid, "chat channel connected");
                    out.extend(self.on_established()?);
                },
                ConnectionAction::Deliver(packet) => out.extend(self.handle_socket_packet(packet)?),
                ConnectionAction::Lost(err) => {
                    tracing::warn!(
                        error = %err,
                        attempt = self.connection.attempt(),
                        "chat channel lost, reconnecting"
                    );
                    // Nobody can see a typing indicator from a dead socket,
                    // and no stop will arrive for the ones shown here.
                    let _ = self.typing.stop();
                    for room_id in self.presence.clear_typing() {
                        out.push(ClientAction::Notify(Notice::TypingChanged { room_id }));
                    }
                    if self.online {
                        self.online = false;
                        out.push(ClientAction::Notify(Notice::ConnectionChanged {
                            connected: false,
                        }));
                        out.push(ClientAction::Notify(Notice::Failure(
                            ChatFailure::TransportDropped { reason: err.to_string() },
                        )));
                    }
                },
                ConnectionAction::Rejected(err) => {
                    let reason = match err {
                        ConnectionError::AuthRejected { reason } => reason,
                        other => other.to_string(),
                    };
                    tracing::warn!(%reason, "authentication rejected");
                    out.push(ClientAction::Notify(Notice::Failure(ChatFailure::AuthRejected {
                        reason,
                    })));
                },
            }
        }
        Ok(out)
    }

    /// Namespace handshake completed: rejoin rooms, refresh the focused
    /// room and flush sends composed while offline.
    fn on_established(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let mut actions = Vec::new();
        if !self.online {
            self.online = true;
            actions.push(ClientAction::Notify(Notice::ConnectionChanged { connected: true }));
        }

        let joined: Vec<RoomId> = self.rooms.joined().cloned().collect();
        for room_id in joined {
            actions.extend(self.emit(ClientEmit::JoinChat { room_id }, None)?);
        }
        if let Some(room_id) = self.rooms.focused().cloned() {
            actions.extend(self.request_history(&room_id));
        }

        let mut queued: Vec<(u64, MessageId)> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| flight.ack_id.is_none())
            .map(|(temp_id, flight)| (flight.seq, temp_id.clone()))
            .collect();
        queued.sort_unstable();
        for (_, temp_id) in queued {
            actions.extend(self.dispatch_send(&temp_id)?);
        }
        Ok(actions)
    }

    fn handle_socket_packet(
        &mut self,
        packet: SocketPacket,
    ) -> Result<Vec<ClientAction>, ClientError> {
        match packet.kind {
            PacketKind::Event => match ServerPush::from_packet(&packet) {
                Ok(push) => Ok(self.handle_push(push)),
                Err(ProtocolError::UnknownEvent(name)) => {
                    tracing::debug!(%name, "ignoring event outside the chat contract");
                    Ok(Vec::new())
                },
                Err(e) => Err(e.into()),
            },
            PacketKind::Ack => {
                let ack_id = packet
                    .ack_id
                    .ok_or_else(|| ProtocolError::MalformedEvent("ack without id".into()))?;
                Ok(self.handle_ack(ack_id, packet.ack_args()))
            },
            other => {
                tracing::warn!(kind = ?other, "unexpected packet on chat namespace");
                Ok(Vec::new())
            },
        }
    }

    fn handle_push(&mut self, push: ServerPush) -> Vec<ClientAction> {
        let now = self.env.now();
        match push {
            ServerPush::NewMessage(message) => self.on_new_message(message, now),
            ServerPush::Typing(notice) => self.on_typing(notice, now),
            ServerPush::RoomUpsert(room) => self.on_room_upsert(room),
            ServerPush::UserList(users) => {
                tracing::debug!(users = users.len(), "user directory snapshot");
                self.presence.apply_user_list(users);
                vec![ClientAction::Notify(Notice::PresenceChanged)]
            },
            ServerPush::Presence(update) => self.on_presence(update),
        }
    }

    fn on_new_message(&mut self, message: Message, now: E::Instant) -> Vec<ClientAction> {
        let room_id = message.room_id.clone();
        let sender_id = message.sender_id.clone();
        let preview = message.clone();

        let outcome = self.timelines.entry(room_id.clone()).or_default().append(message);
        match outcome {
            AppendOutcome::Duplicate => {
                tracing::debug!(message_id = %preview.id, "duplicate delivery ignored");
                return Vec::new();
            },
            AppendOutcome::Reconciled { temp_id } => {
                tracing::debug!(%temp_id, message_id = %preview.id, "send confirmed by echo");
                self.settle(&temp_id);
                self.rooms.replace_last_message(&room_id, &temp_id, &preview);
            },
            AppendOutcome::Inserted => {
                let own = self.identity().is_some_and(|me| me.id == sender_id);
                let unread = !own && !self.rooms.is_focused(&room_id);
                self.rooms.record_message(&room_id, &preview, unread);
            },
        }

        let mut actions = Vec::new();
        // A message ends its author's typing burst even if the "false" is lost.
        if self.presence.set_typing(&room_id, &sender_id, "", false, now) {
            actions.push(ClientAction::Notify(Notice::TypingChanged { room_id: room_id.clone() }));
        }
        actions.push(ClientAction::Notify(Notice::TimelineChanged { room_id }));
        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        actions
    }

    fn on_typing(&mut self, notice: TypingNotice, now: E::Instant) -> Vec<ClientAction> {
        if self.identity().is_some_and(|me| me.id == notice.user_id) {
            return Vec::new();
        }
        let Some(room_id) = notice.chat_id.or_else(|| self.rooms.focused().cloned()) else {
            tracing::debug!(user = %notice.user_id, "typing with no room and nothing focused");
            return Vec::new();
        };

        if self.presence.set_typing(&room_id, &notice.user_id, &notice.name, notice.is_typing, now)
        {
            vec![ClientAction::Notify(Notice::TypingChanged { room_id })]
        } else {
            Vec::new()
        }
    }

    fn on_presence(&mut self, update: PresenceUpdate) -> Vec<ClientAction> {
        if self.presence.apply_presence(update) {
            vec![ClientAction::Notify(Notice::PresenceChanged)]
        } else {
            Vec::new()
        }
    }

    fn on_room_upsert(&mut self, room: Room) -> Vec<ClientAction> {
        let room_id = room.id.clone();
        let mut actions = Vec::new();

        match self.rooms.upsert(room) {
            UpsertOutcome::Merged | UpsertOutcome::Inserted => {},
            UpsertOutcome::Superseded { placeholder } => {
                tracing::info!(%placeholder, %room_id, "placeholder room confirmed by server");
                actions.extend(self.move_room(&placeholder, &room_id));
            },
        }

        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        actions
    }

    /// Carry everything keyed by a placeholder room id over to the server id.
    fn move_room(&mut self, placeholder: &str, room_id: &str) -> Vec<ClientAction> {
        if let Some(mut moved) = self.timelines.remove(placeholder) {
            moved.set_room_id(room_id);
            if let Some(existing) = self.timelines.remove(room_id) {
                moved.absorb(existing);
            }
            self.timelines.insert(room_id.to_string(), moved);
        }
        for flight in self.in_flight.values_mut().filter(|f| f.room_id == placeholder) {
            room_id.clone_into(&mut flight.room_id);
        }
        for batch in self.uploads.values_mut().filter(|b| b.room_id == placeholder) {
            room_id.clone_into(&mut batch.room_id);
        }
        self.presence.rename_room(placeholder, room_id);

        let mut actions = Vec::new();
        if self.typing.active_room().is_some_and(|r| r == placeholder) {
            // Restart the burst under the new id on the next keystroke.
            let _ = self.typing.stop();
        }
        if self.rooms.is_joined(room_id) {
            let join = ClientEmit::JoinChat { room_id: room_id.to_string() };
            match self.emit(join, None) {
                Ok(action) => actions.extend(action),
                Err(e) => tracing::warn!(error = %e, %room_id, "failed to encode join"),
            }
        }
        if self.rooms.is_focused(room_id) {
            actions.push(ClientAction::Notify(Notice::FocusChanged {
                room_id: Some(room_id.to_string()),
            }));
            actions.extend(self.request_history(room_id));
        }
        let room_id = room_id.to_string();
        actions.push(ClientAction::Notify(Notice::TimelineChanged { room_id }));
        actions
    }

    fn handle_ack(&mut self, ack_id: u64, args: &[serde_json::Value]) -> Vec<ClientAction> {
        let Some(temp_id) = self.ack_index.remove(&ack_id) else {
            tracing::debug!(ack_id, "ack for a settled or unknown send");
            return Vec::new();
        };
        let Some(flight) = self.in_flight.remove(&temp_id) else {
            return Vec::new();
        };

        match SendAck::from_args(args) {
            SendAck::Ok(server) => self.confirm_send(&flight.room_id, &temp_id, server),
            SendAck::Rejected { status } => self.fail_send(&flight.room_id, &temp_id, status),
        }
    }

    fn confirm_send(&mut self, room_id: &str, temp_id: &str, server: Message) -> Vec<ClientAction> {
        let server_id = server.id.clone();
        let Some(timeline) = self.timelines.get_mut(room_id) else {
            return Vec::new();
        };
        let Some(confirmed) = timeline.confirm(temp_id, server) else {
            tracing::debug!(%temp_id, "ack for a message no longer pending");
            return Vec::new();
        };
        tracing::debug!(%temp_id, %server_id, folded = confirmed.folded_push, "send confirmed");

        if let Some(message) = timeline.get(&server_id).cloned() {
            self.rooms.replace_last_message(room_id, temp_id, &message);
        }
        vec![
            ClientAction::Notify(Notice::TimelineChanged { room_id: room_id.to_string() }),
            ClientAction::Notify(Notice::RoomsChanged),
        ]
    }

    fn fail_send(&mut self, room_id: &str, temp_id: &str, reason: String) -> Vec<ClientAction> {
        let Some(timeline) = self.timelines.get_mut(room_id) else {
            return Vec::new();
        };
        if !timeline.fail(temp_id) {
            return Vec::new();
        }
        tracing::warn!(%room_id, %temp_id, %reason, "send failed");

        if let Some(message) = timeline.get(temp_id).cloned() {
            self.rooms.replace_last_message(room_id, temp_id, &message);
        }
        vec![
            ClientAction::Notify(Notice::TimelineChanged { room_id: room_id.to_string() }),
            ClientAction::Notify(Notice::Failure(ChatFailure::SendFailed {
                room_id: room_id.to_string(),
                temp_id: temp_id.to_string(),
                reason,
            })),
        ]
    }

    /// Forget a send that has reached a terminal state.
    fn settle(&mut self, temp_id: &str) -> Option<InFlight<E::Instant>> {
        let flight = self.in_flight.remove(temp_id)?;
        if let Some(ack_id) = flight.ack_id {
            self.ack_index.remove(&ack_id);
        }
        Some(flight)
    }

    fn handle_tick(&mut self, now: E::Instant) -> Result<Vec<ClientAction>, ClientError> {
        let connection = self.connection.tick(now);
        let mut actions = self.apply_connection(connection)?;

        if let Some(signal) = self.typing.tick(now) {
            actions.extend(self.emit_typing(signal)?);
        }
        for room_id in self.presence.expire(now, self.config.typing_expiry) {
            actions.push(ClientAction::Notify(Notice::TypingChanged { room_id }));
        }

        let mut expired: Vec<(u64, MessageId)> = self
            .in_flight
            .iter()
            .filter(|(_, flight)| elapsed(now, flight.started) >= self.config.ack_timeout)
            .map(|(temp_id, flight)| (flight.seq, temp_id.clone()))
            .collect();
        expired.sort_unstable();
        for (_, temp_id) in expired {
            if let Some(flight) = self.settle(&temp_id) {
                actions.extend(self.fail_send(&flight.room_id, &temp_id, "timed out".to_string()));
            }
        }
        Ok(actions)
    }

    fn handle_focus(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        if !self.rooms.contains(&room_id) {
            return Err(ClientError::RoomNotFound { room_id });
        }
        if self.rooms.is_focused(&room_id) {
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        if let Some(signal) = self.typing.stop() {
            actions.extend(self.emit_typing(signal)?);
        }

        let change = self
            .rooms
            .focus(&room_id)
            .ok_or_else(|| ClientError::RoomNotFound { room_id: room_id.clone() })?;
        tracing::debug!(%room_id, previous = ?change.previous, "focus changed");

        // Join before the history request so no push falls in the gap.
        if change.newly_joined {
            actions.extend(self.emit(ClientEmit::JoinChat { room_id: room_id.clone() }, None)?);
        }
        actions.extend(self.request_history(&room_id));
        actions.push(ClientAction::Notify(Notice::FocusChanged { room_id: Some(room_id) }));
        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        Ok(actions)
    }

    fn handle_leave(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        if !self.rooms.contains(&room_id) {
            return Err(ClientError::RoomNotFound { room_id });
        }
        let was_focused = self.rooms.is_focused(&room_id);

        let mut actions = Vec::new();
        if self.typing.active_room().is_some_and(|r| *r == room_id)
            && let Some(signal) = self.typing.stop()
        {
            actions.extend(self.emit_typing(signal)?);
        }
        if self.rooms.leave(&room_id) {
            actions.extend(self.emit(ClientEmit::LeaveChat { room_id: room_id.clone() }, None)?);
        }
        if was_focused {
            actions.push(ClientAction::Notify(Notice::FocusChanged { room_id: None }));
        }
        tracing::debug!(%room_id, "left room");
        Ok(actions)
    }

    fn handle_keystroke(&mut self) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.rooms.focused().cloned().ok_or(ClientError::NoFocusedRoom)?;
        let now = self.env.now();

        let mut actions = Vec::new();
        for signal in self.typing.keystroke(&room_id, now) {
            actions.extend(self.emit_typing(signal)?);
        }
        Ok(actions)
    }

    fn handle_send(
        &mut self,
        content: String,
        files: Vec<LocalFile>,
        reply_to: Option<MessageId>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if content.trim().is_empty() && files.is_empty() {
            tracing::debug!("ignoring empty send");
            return Ok(Vec::new());
        }
        if self.identity().is_none() {
            return Err(ClientError::NotSignedIn);
        }
        let room_id = self.rooms.focused().cloned().ok_or(ClientError::NoFocusedRoom)?;

        let mut actions = Vec::new();
        if let Some(signal) = self.typing.stop() {
            actions.extend(self.emit_typing(signal)?);
        }

        if files.is_empty() {
            actions.extend(self.send_message(&room_id, content, Vec::new(), reply_to, false)?);
            return Ok(actions);
        }

        // Attachments resolve to server URLs before any message exists.
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        let total_bytes = files.iter().map(LocalFile::len).sum();
        let mut tracker = ProgressTracker::new();
        let initial = tracker.observe(0, total_bytes);
        tracing::debug!(batch_id, files = files.len(), total_bytes, %room_id, "upload started");

        self.uploads.insert(
            batch_id,
            UploadBatch {
                batch_id,
                room_id,
                content,
                reply_to_id: reply_to,
                file_count: files.len(),
                total_bytes,
                tracker,
            },
        );
        actions.push(ClientAction::Upload { batch_id, files });
        if let Some(percent) = initial {
            actions.push(ClientAction::Notify(Notice::UploadProgress { batch_id, percent }));
        }
        Ok(actions)
    }

    /// Optimistically add a pending message and emit it if connected.
    fn send_message(
        &mut self,
        room_id: &str,
        content: String,
        attachments: Vec<Attachment>,
        reply_to: Option<MessageId>,
        forwarded: bool,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let (me, my_name) = self
            .identity()
            .map(|i| (i.id.clone(), i.display_name.clone()))
            .ok_or(ClientError::NotSignedIn)?;
        let now = self.env.now();
        let millis = self.env.wall_clock_millis();
        let seq = self.next_seq();
        // Tabs of one identity share a clock, so the seq alone can collide.
        let salt = self.env.random_u64() & 0x00ff_ffff;
        let temp_id = format!("{TEMP_MESSAGE_PREFIX}{millis}-{seq}-{salt:06x}");

        let timeline = self.timelines.entry(room_id.to_string()).or_default();
        let reply_preview = reply_to
            .as_deref()
            .and_then(|id| timeline.get(id))
            .map(|m| m.reply_preview(REPLY_SNIPPET_CHARS));

        let mut message = Message::new(temp_id.clone(), room_id, me.clone(), content);
        message.sender_name = Some(my_name);
        message.attachments = attachments;
        message.created_at = DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default();
        message.status = MessageStatus::Pending;
        message.read_by.insert(me);
        message.reply_to_id = reply_to;
        message.reply_preview = reply_preview;
        message.forwarded = forwarded;

        self.rooms.record_message(room_id, &message, false);
        timeline.push_local(message);
        self.in_flight.insert(
            temp_id.clone(),
            InFlight { room_id: room_id.to_string(), ack_id: None, started: now, seq },
        );
        tracing::debug!(%room_id, %temp_id, forwarded, "message pending");

        let mut actions = self.dispatch_send(&temp_id)?;
        let changed = Notice::TimelineChanged { room_id: room_id.to_string() };
        actions.push(ClientAction::Notify(changed));
        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        Ok(actions)
    }

    /// Put a pending message on the wire with a fresh ack id. Queued until
    /// the next connect when offline; the ack deadline runs either way.
    fn dispatch_send(&mut self, temp_id: &str) -> Result<Vec<ClientAction>, ClientError> {
        if !self.connection.is_connected() {
            tracing::debug!(%temp_id, "offline, send queued");
            return Ok(Vec::new());
        }
        let Some(flight) = self.in_flight.get(temp_id) else {
            return Ok(Vec::new());
        };
        let Some(message) = self.timelines.get(&flight.room_id).and_then(|t| t.get(temp_id)) else {
            return Ok(Vec::new());
        };

        let request = SendMessageRequest {
            chat_id: message.room_id.clone(),
            content: message.content.clone(),
            attachments: message.attachments.clone(),
            client_temp_id: temp_id.to_string(),
            reply_to_id: message.reply_to_id.clone(),
            forwarded: message.forwarded,
        };

        let ack_id = self.next_ack_id;
        self.next_ack_id += 1;
        let action = self.emit(ClientEmit::SendMessage(request), Some(ack_id))?;

        if let Some(flight) = self.in_flight.get_mut(temp_id) {
            flight.ack_id = Some(ack_id);
        }
        self.ack_index.insert(ack_id, temp_id.to_string());
        Ok(action.into_iter().collect())
    }

    fn handle_resend(&mut self, temp_id: MessageId) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.room_of(&temp_id).ok_or_else(|| ClientError::MessageNotFound {
            message_id: temp_id.clone(),
        })?;
        let timeline = self.timelines.get_mut(&room_id).ok_or_else(|| {
            ClientError::MessageNotFound { message_id: temp_id.clone() }
        })?;
        timeline.retry(&temp_id).map_err(|status| transition_error(&temp_id, status, "resend"))?;

        let now = self.env.now();
        let seq = self.next_seq();
        let in_flight = InFlight { room_id: room_id.clone(), ack_id: None, started: now, seq };
        self.in_flight.insert(temp_id.clone(), in_flight);
        tracing::info!(%room_id, %temp_id, "resending failed message");

        let mut actions = self.dispatch_send(&temp_id)?;
        actions.push(ClientAction::Notify(Notice::TimelineChanged { room_id }));
        Ok(actions)
    }

    fn handle_discard(&mut self, temp_id: MessageId) -> Result<Vec<ClientAction>, ClientError> {
        let room_id = self.room_of(&temp_id).ok_or_else(|| ClientError::MessageNotFound {
            message_id: temp_id.clone(),
        })?;
        let timeline = self.timelines.get_mut(&room_id).ok_or_else(|| {
            ClientError::MessageNotFound { message_id: temp_id.clone() }
        })?;
        timeline.discard(&temp_id).map_err(|status| transition_error(&temp_id, status, "discard"))?;

        if let Some(last) = timeline.last().cloned() {
            self.rooms.replace_last_message(&room_id, &temp_id, &last);
        }
        tracing::debug!(%room_id, %temp_id, "failed message discarded");
        Ok(vec![
            ClientAction::Notify(Notice::TimelineChanged { room_id }),
            ClientAction::Notify(Notice::RoomsChanged),
        ])
    }

    fn handle_forward(
        &mut self,
        message_id: &str,
        targets: Vec<RoomId>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let source = self.find_message(message_id).cloned().ok_or_else(|| {
            ClientError::MessageNotFound { message_id: message_id.to_string() }
        })?;
        if let Some(missing) = targets.iter().find(|t| !self.rooms.contains(t)) {
            return Err(ClientError::RoomNotFound { room_id: missing.clone() });
        }

        let mut actions = Vec::new();
        for target in targets {
            actions.extend(self.send_message(
                &target,
                source.content.clone(),
                source.attachments.clone(),
                None,
                true,
            )?);
        }
        Ok(actions)
    }

    fn handle_toggle_favorite(
        &mut self,
        message_id: MessageId,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let me = self.identity().map(|i| i.id.clone()).ok_or(ClientError::NotSignedIn)?;
        let message = self
            .find_message(&message_id)
            .ok_or_else(|| ClientError::MessageNotFound { message_id: message_id.clone() })?;
        if message.has_temp_id() {
            return Err(ClientError::Unconfirmed { message_id });
        }
        let room_id = message.room_id.clone();
        let favorite = !message.favorited_by.contains(&me);

        if !self.favorites_in_flight.insert(message_id.clone()) {
            tracing::debug!(%message_id, "favorite toggle already in flight");
            return Ok(Vec::new());
        }
        if let Some(timeline) = self.timelines.get_mut(&room_id) {
            timeline.set_favorite(&message_id, &me, favorite);
        }

        Ok(vec![
            ClientAction::SetFavorite { message_id, favorite },
            ClientAction::Notify(Notice::TimelineChanged { room_id }),
        ])
    }

    fn handle_favorite_completed(
        &mut self,
        message_id: MessageId,
        favorite: bool,
        result: Result<(), String>,
    ) -> Vec<ClientAction> {
        self.favorites_in_flight.remove(&message_id);
        let Err(reason) = result else {
            return Vec::new();
        };
        tracing::warn!(%message_id, %reason, "favorite toggle failed, rolling back");

        let mut actions = Vec::new();
        if let Some(me) = self.identity().map(|i| i.id.clone())
            && let Some(room_id) = self.room_of(&message_id)
            && let Some(timeline) = self.timelines.get_mut(&room_id)
        {
            timeline.set_favorite(&message_id, &me, !favorite);
            actions.push(ClientAction::Notify(Notice::TimelineChanged { room_id }));
        }
        actions.push(ClientAction::Notify(Notice::Failure(ChatFailure::FavoriteFailed {
            message_id,
            reason,
        })));
        actions
    }

    fn handle_start_direct_chat(
        &mut self,
        peer_id: UserId,
        peer_name: String,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let me = self.identity().map(|i| i.id.clone()).ok_or(ClientError::NotSignedIn)?;

        let room_id = match self.rooms.find_direct(&me, &peer_id) {
            Some(room) => room.id.clone(),
            None => {
                let room_id = direct_room_id(&me, &peer_id);
                tracing::debug!(%room_id, "starting direct chat");
                let room = Room::new(room_id.clone(), false, peer_name, [me, peer_id]);
                self.rooms.insert_optimistic(room);
                room_id
            },
        };

        let mut actions = self.handle_focus(room_id)?;
        actions.push(ClientAction::Notify(Notice::RoomsChanged));
        Ok(actions)
    }

    fn handle_create_group(
        &mut self,
        name: String,
        member_ids: Vec<UserId>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let me = self.identity().map(|i| i.id.clone()).ok_or(ClientError::NotSignedIn)?;

        let mut millis = self.env.wall_clock_millis();
        while self.rooms.contains(&group_room_id(millis)) {
            millis += 1;
        }
        let room_id = group_room_id(millis);
        tracing::debug!(%room_id, %name, members = member_ids.len() + 1, "creating group");

        let members = member_ids.into_iter().chain(std::iter::once(me));
        self.rooms.insert_optimistic(Room::new(room_id.clone(), true, name, members));
        self.handle_focus(room_id)
    }

    fn handle_reload(&mut self, room_id: RoomId) -> Result<Vec<ClientAction>, ClientError> {
        if !self.rooms.contains(&room_id) {
            return Err(ClientError::RoomNotFound { room_id });
        }
        Ok(self.request_history(&room_id).into_iter().collect())
    }

    /// Ask for a room's history unless a request is already out. Placeholder
    /// rooms have no server history yet.
    fn request_history(&mut self, room_id: &str) -> Option<ClientAction> {
        let timeline = self.timelines.entry(room_id.to_string()).or_default();
        if is_placeholder_id(room_id) {
            timeline.set_load_state(LoadState::Loaded);
            return None;
        }
        if *timeline.load_state() == LoadState::Loading {
            return None;
        }
        timeline.set_load_state(LoadState::Loading);
        Some(ClientAction::LoadHistory { room_id: room_id.to_string() })
    }

    fn handle_history_loaded(
        &mut self,
        room_id: RoomId,
        result: Result<Vec<Message>, String>,
    ) -> Vec<ClientAction> {
        let timeline = self.timelines.entry(room_id.clone()).or_default();
        match result {
            Ok(history) => {
                let count = history.len();
                let absorbed = timeline.replace_history(history);
                let last = timeline.last().cloned();
                for temp_id in &absorbed {
                    self.settle(temp_id);
                }
                if let Some(last) = last {
                    self.rooms.record_message(&room_id, &last, false);
                }
                tracing::debug!(%room_id, count, absorbed = absorbed.len(), "history loaded");
                vec![
                    ClientAction::Notify(Notice::TimelineChanged { room_id }),
                    ClientAction::Notify(Notice::RoomsChanged),
                ]
            },
            Err(reason) => {
                timeline.set_load_state(LoadState::Failed(reason.clone()));
                tracing::warn!(%room_id, %reason, "history load failed");
                vec![
                    ClientAction::Notify(Notice::TimelineChanged { room_id: room_id.clone() }),
                    ClientAction::Notify(Notice::Failure(ChatFailure::LoadFailed {
                        room_id,
                        reason,
                    })),
                ]
            },
        }
    }

    fn handle_upload_progress(
        &mut self,
        batch_id: u64,
        sent: u64,
        total: u64,
    ) -> Vec<ClientAction> {
        let Some(batch) = self.uploads.get_mut(&batch_id) else {
            tracing::debug!(batch_id, "progress for a finished upload");
            return Vec::new();
        };
        batch
            .tracker
            .observe(sent, total)
            .map(|percent| ClientAction::Notify(Notice::UploadProgress { batch_id, percent }))
            .into_iter()
            .collect()
    }

    fn handle_upload_completed(
        &mut self,
        batch_id: u64,
        result: Result<Vec<Attachment>, String>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let mut batch =
            self.uploads.remove(&batch_id).ok_or(ClientError::UnknownUpload { batch_id })?;

        match result {
            Ok(mut attachments) => {
                let mut actions: Vec<ClientAction> = batch
                    .tracker
                    .complete()
                    .map(|percent| {
                        ClientAction::Notify(Notice::UploadProgress { batch_id, percent })
                    })
                    .into_iter()
                    .collect();
                for attachment in &mut attachments {
                    attachment.upload_progress = 100;
                }
                tracing::debug!(
                    batch_id,
                    files = batch.file_count,
                    attachments = attachments.len(),
                    "upload finished"
                );
                actions.extend(self.send_message(
                    &batch.room_id,
                    batch.content,
                    attachments,
                    batch.reply_to_id,
                    false,
                )?);
                Ok(actions)
            },
            Err(reason) => {
                tracing::warn!(batch_id, %reason, "upload failed, message not sent");
                Ok(vec![ClientAction::Notify(Notice::Failure(ChatFailure::UploadFailed {
                    batch_id,
                    reason,
                }))])
            },
        }
    }

    fn emit_typing(&mut self, signal: TypingSignal) -> Result<Option<ClientAction>, ClientError> {
        let emit = ClientEmit::Typing {
            chat_id: signal.room_id().clone(),
            is_typing: signal.is_typing(),
        };
        self.emit(emit, None)
    }

    /// Encode an emit for the transport. Dropped while not connected.
    fn emit(
        &mut self,
        emit: ClientEmit,
        ack_id: Option<u64>,
    ) -> Result<Option<ClientAction>, ClientError> {
        if !self.connection.is_connected() {
            tracing::debug!(event = emit.event_name(), "not connected, emit dropped");
            return Ok(None);
        }
        let packet = emit.into_packet(self.connection.namespace(), ack_id)?;
        Ok(Some(ClientAction::SendFrame(EnginePacket::Message(packet).encode()?)))
    }

    fn room_of(&self, message_id: &str) -> Option<RoomId> {
        self.timelines.iter().find(|(_, t)| t.contains(message_id)).map(|(id, _)| id.clone())
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.temp_seq;
        self.temp_seq += 1;
        seq
    }
}

/// `now - since`, zero if the clock reads earlier than `since`.
fn elapsed<I>(now: I, since: I) -> Duration
where
    I: Copy + Ord + std::ops::Sub<Output = Duration>,
{
    if now >= since { now - since } else { Duration::ZERO }
}

fn transition_error(
    message_id: &str,
    status: Option<MessageStatus>,
    operation: &'static str,
) -> ClientError {
    match status {
        Some(status) => {
            ClientError::InvalidTransition { message_id: message_id.to_string(), status, operation }
        },
        None => ClientError::MessageNotFound { message_id: message_id.to_string() },
    }
}
