//! In-memory `/chat` server for simulation.
//!
//! `SimServer` speaks the same Engine.IO/Socket.IO text frames as the real
//! campus chat server, plus the HTTP side (history, uploads, favorites,
//! downloads) as plain method calls. Each connection has an outbox the test
//! world drains into the owning client, so delivery order is entirely under
//! the test's control.
//!
//! Behavior follows the production server where the client depends on it:
//! acks go to the sending socket, `new-message` goes to every socket joined to
//! the room (including the sender's, which is the echo), and typing goes to
//! every joined socket except the sender's.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use quadchat_client::LocalFile;
use quadchat_core::Environment;
use quadchat_proto::{
    Attachment, AttachmentKind, CHAT_NAMESPACE, ClientEmit, EnginePacket, Message, OpenHandshake,
    PacketKind, PresenceUpdate, ProtocolError, Room, RoomId, SendAck, SendMessageRequest,
    ServerPush, SocketPacket, TypingNotice, UserId, UserSummary,
};
use serde_json::{Value, json};
use thiserror::Error;

use crate::SimEnv;

/// Characters of the replied-to message kept in a reply preview.
const REPLY_SNIPPET_CHARS: usize = 80;

/// Connection identifier.
pub type ConnId = u64;

/// Server errors. Only malformed client traffic surfaces here; domain
/// refusals become rejections on the wire.
#[derive(Debug, Error)]
pub enum SimServerError {
    /// No such connection (closed or never opened).
    #[error("unknown connection {0}")]
    UnknownConnection(ConnId),

    /// Frame did not decode.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Injected misbehavior.
#[derive(Debug, Clone, Default)]
pub struct ServerFaults {
    /// Hold `send-message` acks until [`SimServer::release_acks`].
    /// Broadcasts still go out, so echoes overtake their acks.
    pub hold_acks: bool,
    /// Reject every send with this status.
    pub reject_sends: Option<String>,
    /// Fail uploads with this error text.
    pub fail_uploads: Option<String>,
    /// Fail favorite toggles.
    pub fail_favorites: bool,
    /// Fail history requests.
    pub fail_history: bool,
}

#[derive(Debug, Clone)]
struct Account {
    display_name: String,
    token: String,
}

#[derive(Debug, Default)]
struct Conn {
    user: Option<UserId>,
    joined: BTreeSet<RoomId>,
    outbox: VecDeque<String>,
}

/// In-memory chat server.
#[derive(Debug)]
pub struct SimServer {
    env: SimEnv,
    accounts: BTreeMap<UserId, Account>,
    rooms: BTreeMap<RoomId, Room>,
    history: BTreeMap<RoomId, Vec<Message>>,
    files: BTreeMap<String, Bytes>,
    conns: BTreeMap<ConnId, Conn>,
    held_acks: Vec<(ConnId, SocketPacket)>,
    received: Vec<(ConnId, ClientEmit)>,
    next_conn: ConnId,
    next_id: u64,
    faults: ServerFaults,
}

impl SimServer {
    /// Empty server on `env`'s clock.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            accounts: BTreeMap::new(),
            rooms: BTreeMap::new(),
            history: BTreeMap::new(),
            files: BTreeMap::new(),
            conns: BTreeMap::new(),
            held_acks: Vec::new(),
            received: Vec::new(),
            next_conn: 1,
            next_id: 0,
            faults: ServerFaults::default(),
        }
    }

    /// Register an account. Re-registering replaces name and token.
    pub fn add_user(&mut self, id: &str, display_name: &str, token: &str) {
        let account = Account { display_name: display_name.into(), token: token.into() };
        self.accounts.insert(id.into(), account);
    }

    /// Create (or replace) a room and announce it to its connected members.
    pub fn create_room(&mut self, room: Room) {
        tracing::debug!(room_id = %room.id, members = room.member_ids.len(), "room created");
        self.history.entry(room.id.clone()).or_default();
        for conn in self.member_conns(&room) {
            self.push(conn, ServerPush::RoomUpsert(room.clone()));
        }
        self.rooms.insert(room.id.clone(), room);
    }

    /// Fault switches.
    pub fn faults_mut(&mut self) -> &mut ServerFaults {
        &mut self.faults
    }

    /// Accept a WebSocket. The Engine.IO open packet is already queued.
    pub fn connect(&mut self) -> ConnId {
        let id = self.next_conn;
        self.next_conn += 1;
        self.conns.insert(id, Conn::default());

        let open = EnginePacket::Open(OpenHandshake {
            sid: format!("eio-{id}"),
            upgrades: Vec::new(),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: 1_000_000,
        });
        self.send(id, &open);
        id
    }

    /// Drop a connection. Its undelivered frames are lost.
    pub fn disconnect(&mut self, conn: ConnId) {
        let Some(closed) = self.conns.remove(&conn) else {
            return;
        };
        self.held_acks.retain(|(c, _)| *c != conn);
        if let Some(user) = closed.user
            && !self.is_online(&user)
        {
            let update =
                PresenceUpdate { user_id: user, online: false, last_seen: Some(self.timestamp()) };
            self.broadcast_presence(&update);
        }
    }

    /// Whether `conn` is still open.
    pub fn is_open(&self, conn: ConnId) -> bool {
        self.conns.contains_key(&conn)
    }

    /// Open connections.
    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    /// Whether `user` has a connection on the namespace.
    pub fn is_online(&self, user: &str) -> bool {
        self.conns.values().any(|c| c.user.as_deref() == Some(user))
    }

    /// Next frame queued for `conn`.
    pub fn pop_frame(&mut self, conn: ConnId) -> Option<String> {
        self.conns.get_mut(&conn)?.outbox.pop_front()
    }

    /// Frames queued for `conn`, in order.
    pub fn queued(&self, conn: ConnId) -> usize {
        self.conns.get(&conn).map_or(0, |c| c.outbox.len())
    }

    /// Deliver held acks to their sockets.
    pub fn release_acks(&mut self) {
        for (conn, ack) in std::mem::take(&mut self.held_acks) {
            self.send(conn, &EnginePacket::Message(ack));
        }
    }

    /// Engine.IO ping on every connection.
    pub fn heartbeat(&mut self) {
        let conns: Vec<_> = self.conns.keys().copied().collect();
        for conn in conns {
            self.send(conn, &EnginePacket::Ping);
        }
    }

    /// Stored messages of a room, in server order.
    pub fn messages(&self, room_id: &str) -> &[Message] {
        self.history.get(room_id).map_or(&[], Vec::as_slice)
    }

    /// A room as the server knows it.
    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Every event received, with its connection.
    pub fn received(&self) -> &[(ConnId, ClientEmit)] {
        &self.received
    }

    /// Names of the events received from `conn`.
    pub fn received_from(&self, conn: ConnId) -> Vec<&'static str> {
        self.received.iter().filter(|(c, _)| *c == conn).map(|(_, e)| e.event_name()).collect()
    }

    /// Handle one text frame from `conn`.
    pub fn receive(&mut self, conn: ConnId, text: &str) -> Result<(), SimServerError> {
        if !self.conns.contains_key(&conn) {
            return Err(SimServerError::UnknownConnection(conn));
        }

        match EnginePacket::decode(text)? {
            EnginePacket::Close => self.disconnect(conn),
            EnginePacket::Message(packet) => match packet.kind {
                PacketKind::Connect => self.on_connect(conn, &packet),
                PacketKind::Disconnect => {
                    if let Some(c) = self.conns.get_mut(&conn) {
                        c.user = None;
                        c.joined.clear();
                    }
                },
                PacketKind::Event => {
                    let emit = ClientEmit::from_packet(&packet)?;
                    self.on_event(conn, emit, packet.ack_id);
                },
                PacketKind::Ack | PacketKind::ConnectError => {
                    tracing::debug!(conn, kind = ?packet.kind, "ignoring client packet");
                },
            },
            EnginePacket::Ping => self.send(conn, &EnginePacket::Pong),
            EnginePacket::Open(_)
            | EnginePacket::Pong
            | EnginePacket::Upgrade
            | EnginePacket::Noop => {},
        }
        Ok(())
    }

    fn on_connect(&mut self, conn: ConnId, packet: &SocketPacket) {
        let token = packet.data.as_ref().and_then(|d| d.get("token")).and_then(Value::as_str);
        let user = token.and_then(|t| {
            self.accounts.iter().find(|(_, a)| a.token == t).map(|(id, _)| id.clone())
        });

        let Some(user) = user else {
            tracing::debug!(conn, "rejecting unknown token");
            let refusal = SocketPacket {
                kind: PacketKind::ConnectError,
                namespace: packet.namespace.clone(),
                ack_id: None,
                data: Some(json!({ "message": "invalid token" })),
            };
            self.send(conn, &EnginePacket::Message(refusal));
            return;
        };

        let was_online = self.is_online(&user);
        if let Some(c) = self.conns.get_mut(&conn) {
            c.user = Some(user.clone());
        }
        let accepted = SocketPacket {
            kind: PacketKind::Connect,
            namespace: packet.namespace.clone(),
            ack_id: None,
            data: Some(json!({ "sid": format!("sock-{conn}") })),
        };
        self.send(conn, &EnginePacket::Message(accepted));

        let rooms: Vec<Room> =
            self.rooms.values().filter(|r| r.member_ids.contains(&user)).cloned().collect();
        for room in rooms {
            self.push(conn, ServerPush::RoomUpsert(room));
        }

        if !was_online {
            let update = PresenceUpdate { user_id: user, online: true, last_seen: None };
            self.broadcast_presence(&update);
        }
    }

    fn on_event(&mut self, conn: ConnId, emit: ClientEmit, ack_id: Option<u64>) {
        self.received.push((conn, emit.clone()));
        let Some(user) = self.conns.get(&conn).and_then(|c| c.user.clone()) else {
            tracing::debug!(conn, event = emit.event_name(), "event before namespace connect");
            return;
        };

        match emit {
            ClientEmit::JoinChat { room_id } => {
                if let Some(c) = self.conns.get_mut(&conn) {
                    c.joined.insert(room_id);
                }
            },
            ClientEmit::LeaveChat { room_id } => {
                if let Some(c) = self.conns.get_mut(&conn) {
                    c.joined.remove(&room_id);
                }
            },
            ClientEmit::SendMessage(request) => match ack_id {
                Some(ack_id) => self.on_send(conn, &user, request, ack_id),
                None => tracing::warn!(conn, "send-message without ack id"),
            },
            ClientEmit::Typing { chat_id, is_typing } => {
                let name = self.display_name(&user);
                let notice =
                    TypingNotice { user_id: user, name, chat_id: Some(chat_id.clone()), is_typing };
                for other in self.joined_conns(&chat_id) {
                    if other != conn {
                        self.push(other, ServerPush::Typing(notice.clone()));
                    }
                }
            },
            ClientEmit::FetchUserList => {
                let users = self.user_list();
                self.push(conn, ServerPush::UserList(users));
            },
            ClientEmit::PresenceSubscribe => {},
        }
    }

    fn on_send(&mut self, conn: ConnId, user: &str, request: SendMessageRequest, ack_id: u64) {
        if let Some(status) = self.faults.reject_sends.clone() {
            self.ack(conn, ack_id, SendAck::Rejected { status });
            return;
        }
        let Some(room) = self.rooms.get(&request.chat_id) else {
            self.ack(conn, ack_id, SendAck::Rejected { status: "unknown-chat".into() });
            return;
        };
        if !room.member_ids.contains(user) {
            self.ack(conn, ack_id, SendAck::Rejected { status: "forbidden".into() });
            return;
        }

        self.next_id += 1;
        let SendMessageRequest {
            chat_id,
            content,
            attachments,
            client_temp_id,
            reply_to_id,
            forwarded,
        } = request;
        let mut message = Message::new(format!("msg-{}", self.next_id), &chat_id, user, content);
        message.sender_name = Some(self.display_name(user));
        message.attachments = attachments;
        message.created_at = self.timestamp();
        message.reply_preview = reply_to_id.as_deref().and_then(|id| {
            self.messages(&chat_id)
                .iter()
                .find(|m| m.id == id)
                .map(|m| m.reply_preview(REPLY_SNIPPET_CHARS))
        });
        message.reply_to_id = reply_to_id;
        message.forwarded = forwarded;
        message.client_temp_id = Some(client_temp_id);
        tracing::debug!(conn, id = %message.id, room_id = %chat_id, "message stored");

        self.history.entry(chat_id.clone()).or_default().push(message.clone());
        let Some(room) = self.rooms.get_mut(&chat_id) else {
            return;
        };
        room.last_message = Some(message.clone());
        let room = room.clone();

        self.ack(conn, ack_id, SendAck::Ok(message.clone()));

        let joined = self.joined_conns(&chat_id);
        for member in self.member_conns(&room) {
            if joined.contains(&member) {
                self.push(member, ServerPush::NewMessage(message.clone()));
            } else {
                self.push(member, ServerPush::RoomUpsert(room.clone()));
            }
        }
    }

    fn ack(&mut self, conn: ConnId, ack_id: u64, reply: SendAck) {
        let args = match reply.into_args() {
            Ok(args) => args,
            Err(e) => {
                tracing::error!(conn, error = %e, "ack did not encode");
                return;
            },
        };
        let packet = SocketPacket::ack(CHAT_NAMESPACE, ack_id, args);
        if self.faults.hold_acks {
            self.held_acks.push((conn, packet));
        } else {
            self.send(conn, &EnginePacket::Message(packet));
        }
    }

    fn push(&mut self, conn: ConnId, push: ServerPush) {
        match push.into_packet(CHAT_NAMESPACE) {
            Ok(packet) => self.send(conn, &EnginePacket::Message(packet)),
            Err(e) => tracing::error!(conn, error = %e, "push did not encode"),
        }
    }

    fn send(&mut self, conn: ConnId, packet: &EnginePacket) {
        let Some(c) = self.conns.get_mut(&conn) else {
            return;
        };
        match packet.encode() {
            Ok(text) => c.outbox.push_back(text),
            Err(e) => tracing::error!(conn, error = %e, "frame did not encode"),
        }
    }

    fn broadcast_presence(&mut self, update: &PresenceUpdate) {
        let conns: Vec<_> = self
            .conns
            .iter()
            .filter(|(_, c)| c.user.as_ref().is_some_and(|u| *u != update.user_id))
            .map(|(id, _)| *id)
            .collect();
        for conn in conns {
            self.push(conn, ServerPush::Presence(update.clone()));
        }
    }

    /// Connections signed in as a member of `room`.
    fn member_conns(&self, room: &Room) -> Vec<ConnId> {
        self.conns
            .iter()
            .filter(|(_, c)| c.user.as_ref().is_some_and(|u| room.member_ids.contains(u)))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Connections joined to `room_id`.
    fn joined_conns(&self, room_id: &str) -> Vec<ConnId> {
        self.conns.iter().filter(|(_, c)| c.joined.contains(room_id)).map(|(id, _)| *id).collect()
    }

    fn user_list(&self) -> Vec<UserSummary> {
        self.accounts
            .iter()
            .map(|(id, account)| UserSummary {
                id: id.clone(),
                display_name: account.display_name.clone(),
                avatar_ref: None,
                online: self.is_online(id),
                last_seen: None,
            })
            .collect()
    }

    fn display_name(&self, user: &str) -> String {
        self.accounts.get(user).map_or_else(|| user.to_string(), |a| a.display_name.clone())
    }

    fn timestamp(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.env.wall_clock_millis()).unwrap_or_default()
    }

    fn authorize(&self, token: &str) -> Result<UserId, String> {
        self.accounts
            .iter()
            .find(|(_, a)| a.token == token)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| "401 unauthorized".to_string())
    }

    /// `GET /api/rooms/{room_id}/messages`.
    pub fn history(&self, token: &str, room_id: &str) -> Result<Vec<Message>, String> {
        let user = self.authorize(token)?;
        if self.faults.fail_history {
            return Err("503 service unavailable".into());
        }
        let room = self.rooms.get(room_id).ok_or_else(|| format!("404 no room {room_id}"))?;
        if !room.member_ids.contains(&user) {
            return Err("403 forbidden".into());
        }
        Ok(self.messages(room_id).to_vec())
    }

    /// `POST /api/upload`.
    pub fn upload(&mut self, token: &str, files: &[LocalFile]) -> Result<Vec<Attachment>, String> {
        self.authorize(token)?;
        if let Some(reason) = &self.faults.fail_uploads {
            return Err(reason.clone());
        }
        let mut attachments = Vec::with_capacity(files.len());
        for file in files {
            self.next_id += 1;
            let url = format!("/uploads/{}-{}", self.next_id, file.filename);
            let kind = file.mime_type.as_deref().map_or_else(
                || AttachmentKind::from_filename(&file.filename),
                AttachmentKind::classify,
            );
            self.files.insert(url.clone(), file.data.clone());
            attachments.push(Attachment {
                url,
                kind,
                filename: file.filename.clone(),
                size_bytes: file.len(),
                upload_progress: 0,
            });
        }
        Ok(attachments)
    }

    /// `POST /api/messages/{id}/favorite` or `/unfavorite`.
    pub fn set_favorite(
        &mut self,
        token: &str,
        message_id: &str,
        favorite: bool,
    ) -> Result<(), String> {
        let user = self.authorize(token)?;
        if self.faults.fail_favorites {
            return Err("500 internal error".into());
        }
        let message = self
            .history
            .values_mut()
            .flat_map(|messages| messages.iter_mut())
            .find(|m| m.id == message_id)
            .ok_or_else(|| format!("404 no message {message_id}"))?;
        if favorite {
            message.favorited_by.insert(user);
        } else {
            message.favorited_by.remove(&user);
        }
        Ok(())
    }

    /// Stored upload bytes.
    pub fn download(&self, token: &str, url: &str) -> Result<Bytes, String> {
        self.authorize(token)?;
        self.files.get(url).cloned().ok_or_else(|| format!("404 {url}"))
    }
}

/// Server shared between simulated clients, drivers and APIs.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Create a shared server on `env`'s clock.
pub fn create_shared_server(env: SimEnv) -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new(env)))
}

#[cfg(test)]
mod tests {
    use quadchat_proto::MessageStatus;

    use super::*;

    fn server() -> SimServer {
        let mut server = SimServer::new(SimEnv::new());
        server.add_user("ada", "Ada", "tok-ada");
        server.add_user("bo", "Bo", "tok-bo");
        server.create_room(Room::new("r1", true, "Study", ["ada".to_string(), "bo".to_string()]));
        server
    }

    fn frame(packet: SocketPacket) -> String {
        EnginePacket::Message(packet).encode().unwrap()
    }

    fn drain(server: &mut SimServer, conn: ConnId) -> Vec<EnginePacket> {
        std::iter::from_fn(|| server.pop_frame(conn))
            .map(|text| EnginePacket::decode(&text).unwrap())
            .collect()
    }

    fn signed_in(server: &mut SimServer, token: &str) -> ConnId {
        let conn = server.connect();
        let connect = SocketPacket::connect(CHAT_NAMESPACE, json!({ "token": token }));
        server.receive(conn, &frame(connect)).unwrap();
        drain(server, conn);
        conn
    }

    fn events(packets: &[EnginePacket]) -> Vec<String> {
        packets
            .iter()
            .filter_map(|p| match p {
                EnginePacket::Message(m) => m.as_event().map(|(name, _)| name.to_string()),
                _ => None,
            })
            .collect()
    }

    fn join(server: &mut SimServer, conn: ConnId) {
        let join = ClientEmit::JoinChat { room_id: "r1".into() };
        server.receive(conn, &frame(join.into_packet(CHAT_NAMESPACE, None).unwrap())).unwrap();
    }

    fn send(server: &mut SimServer, conn: ConnId, temp: &str) {
        let request = SendMessageRequest {
            chat_id: "r1".into(),
            content: "hello".into(),
            attachments: vec![],
            client_temp_id: temp.into(),
            reply_to_id: None,
            forwarded: false,
        };
        let packet = ClientEmit::SendMessage(request).into_packet(CHAT_NAMESPACE, Some(7)).unwrap();
        server.receive(conn, &frame(packet)).unwrap();
    }

    #[test]
    fn handshake_announces_member_rooms() {
        let mut server = server();
        let conn = server.connect();
        assert!(matches!(drain(&mut server, conn).as_slice(), [EnginePacket::Open(_)]));

        let connect = SocketPacket::connect(CHAT_NAMESPACE, json!({ "token": "tok-ada" }));
        server.receive(conn, &frame(connect)).unwrap();

        let packets = drain(&mut server, conn);
        assert!(matches!(&packets[0], EnginePacket::Message(p) if p.kind == PacketKind::Connect));
        assert_eq!(events(&packets), ["room-upsert"]);
        assert!(server.is_online("ada"));
    }

    #[test]
    fn unknown_token_is_refused() {
        let mut server = server();
        let conn = server.connect();
        drain(&mut server, conn);
        let connect = SocketPacket::connect(CHAT_NAMESPACE, json!({ "token": "stolen" }));
        server.receive(conn, &frame(connect)).unwrap();

        let packets = drain(&mut server, conn);
        assert!(
            matches!(&packets[..], [EnginePacket::Message(p)] if p.kind == PacketKind::ConnectError)
        );
        assert!(!server.is_online("ada"));
    }

    #[test]
    fn send_acks_sender_and_echoes_to_room() {
        let mut server = server();
        let ada = signed_in(&mut server, "tok-ada");
        let bo = signed_in(&mut server, "tok-bo");
        drain(&mut server, ada); // bo's presence
        join(&mut server, ada);
        join(&mut server, bo);

        send(&mut server, ada, "temp-1");

        let to_ada = drain(&mut server, ada);
        let EnginePacket::Message(ack) = &to_ada[0] else { panic!("expected ack first") };
        assert_eq!(ack.kind, PacketKind::Ack);
        let SendAck::Ok(stored) = SendAck::from_args(ack.ack_args()) else { panic!("rejected") };
        assert_eq!(stored.client_temp_id.as_deref(), Some("temp-1"));
        assert_eq!(stored.status, MessageStatus::Sent);
        assert_eq!(events(&to_ada), ["new-message"]);
        assert_eq!(events(&drain(&mut server, bo)), ["new-message"]);
        assert_eq!(server.messages("r1").len(), 1);
    }

    #[test]
    fn held_acks_arrive_after_the_echo() {
        let mut server = server();
        let ada = signed_in(&mut server, "tok-ada");
        join(&mut server, ada);
        server.faults_mut().hold_acks = true;

        send(&mut server, ada, "temp-1");
        assert_eq!(events(&drain(&mut server, ada)), ["new-message"]);

        server.release_acks();
        let packets = drain(&mut server, ada);
        assert!(matches!(&packets[..], [EnginePacket::Message(p)] if p.kind == PacketKind::Ack));
    }

    #[test]
    fn non_joined_members_get_room_previews() {
        let mut server = server();
        let ada = signed_in(&mut server, "tok-ada");
        let bo = signed_in(&mut server, "tok-bo");
        drain(&mut server, ada);
        join(&mut server, ada);

        send(&mut server, ada, "temp-1");
        assert_eq!(events(&drain(&mut server, bo)), ["room-upsert"]);
    }

    #[test]
    fn last_connection_closing_broadcasts_offline() {
        let mut server = server();
        let ada = signed_in(&mut server, "tok-ada");
        let bo = signed_in(&mut server, "tok-bo");
        drain(&mut server, ada);

        server.disconnect(bo);
        let packets = drain(&mut server, ada);
        assert_eq!(events(&packets), ["presence"]);
        assert!(!server.is_online("bo"));
    }

    #[test]
    fn http_requires_a_known_token() {
        let mut server = server();
        assert!(server.history("nope", "r1").is_err());
        assert!(server.history("tok-ada", "r1").unwrap().is_empty());

        let file = LocalFile::new("notes.pdf", None, Bytes::from_static(b"%PDF"));
        let [attachment] = server.upload("tok-ada", &[file]).unwrap().try_into().unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Pdf);
        assert_eq!(server.download("tok-bo", &attachment.url).unwrap().as_ref(), b"%PDF");
    }
}
