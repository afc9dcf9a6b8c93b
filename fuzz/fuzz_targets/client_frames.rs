//! Fuzz target for the client state machine fed from the wire.
//!
//! # Strategy
//!
//! - Raw frames: arbitrary text straight into `FrameReceived`
//! - Pushes: well-formed `new-message` and `typing` events for a known room
//! - Acks: arbitrary ack ids and statuses
//! - User steps and clock ticks in between
//!
//! # Invariants
//!
//! - The client never panics; bad input is an `Err` or ignored
//! - No timeline ever holds two messages with the same id

#![no_main]

use std::{collections::HashSet, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use quadchat_client::{Client, ClientConfig, ClientEvent};
use quadchat_core::{Environment, SessionContext, env::test_utils::MockEnv};
use quadchat_proto::{
    AuthToken, CHAT_NAMESPACE, EnginePacket, Identity, OpenHandshake, PacketKind, SocketPacket,
};
use serde_json::json;
use url::Url;

const ROOM: &str = "r1";

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    RawFrame(String),
    NewMessage { id: u8, temp: Option<u8>, sender_is_me: bool },
    Typing { typing: bool },
    Ack { ack_id: u8, ok: bool, id: u8 },
    Send(String),
    Keystroke,
    Advance(u16),
    Drop,
}

fn frame(packet: SocketPacket) -> Option<ClientEvent<Duration>> {
    EnginePacket::Message(packet).encode().ok().map(ClientEvent::FrameReceived)
}

fn event(name: &str, body: serde_json::Value) -> Option<ClientEvent<Duration>> {
    frame(SocketPacket::event(CHAT_NAMESPACE, name, vec![body], None))
}

fn message(id: u8, temp: Option<u8>, sender: &str) -> serde_json::Value {
    json!({
        "id": format!("m{id}"),
        "chatId": ROOM,
        "senderId": sender,
        "content": "x",
        "clientTempId": temp.map(|t| format!("temp-{t}")),
    })
}

fn to_event(input: Input, env: &MockEnv) -> Option<ClientEvent<Duration>> {
    match input {
        Input::RawFrame(text) => Some(ClientEvent::FrameReceived(text)),
        Input::NewMessage { id, temp, sender_is_me } => {
            let sender = if sender_is_me { "me" } else { "bo" };
            event("new-message", message(id, temp, sender))
        },
        Input::Typing { typing } => {
            event("typing", json!({ "userId": "bo", "chatId": ROOM, "isTyping": typing }))
        },
        Input::Ack { ack_id, ok, id } => {
            let reply = if ok {
                json!({ "status": "ok", "message": message(id, None, "me") })
            } else {
                json!({ "status": "error" })
            };
            frame(SocketPacket::ack(CHAT_NAMESPACE, u64::from(ack_id), vec![reply]))
        },
        Input::Send(content) => {
            Some(ClientEvent::Send { content, files: Vec::new(), reply_to: None })
        },
        Input::Keystroke => Some(ClientEvent::Keystroke),
        Input::Advance(ms) => {
            env.advance(Duration::from_millis(u64::from(ms)));
            Some(ClientEvent::Tick { now: env.now() })
        },
        Input::Drop => Some(ClientEvent::TransportClosed { reason: "fuzz".into() }),
    }
}

fn connected() -> Option<(Client<MockEnv>, MockEnv)> {
    let env = MockEnv::new();
    let mut client = Client::new(env.clone(), ClientConfig::default());
    let url = Url::parse("https://portal.example.edu").ok()?;
    let session = SessionContext::new(Identity::new("me", "Me", AuthToken::new("t")), url);
    client.handle(ClientEvent::SignIn(session)).ok()?;

    let open = EnginePacket::Open(OpenHandshake {
        sid: "eio".into(),
        upgrades: vec![],
        ping_interval: 25_000,
        ping_timeout: 20_000,
        max_payload: 1_000_000,
    });
    client.handle(ClientEvent::FrameReceived(open.encode().ok()?)).ok()?;
    let connect = SocketPacket {
        kind: PacketKind::Connect,
        namespace: CHAT_NAMESPACE.into(),
        ack_id: None,
        data: Some(json!({ "sid": "sock" })),
    };
    client.handle(frame(connect)?).ok()?;

    let room = json!({
        "id": ROOM,
        "isGroup": true,
        "name": "Algorithms",
        "memberIds": ["me", "bo"],
    });
    client.handle(event("room-upsert", room)?).ok()?;
    client.handle(ClientEvent::Focus { room_id: ROOM.into() }).ok()?;
    client.handle(ClientEvent::HistoryLoaded { room_id: ROOM.into(), result: Ok(vec![]) }).ok()?;
    Some((client, env))
}

fuzz_target!(|inputs: Vec<Input>| {
    let Some((mut client, env)) = connected() else {
        return;
    };
    for input in inputs {
        let Some(event) = to_event(input, &env) else {
            continue;
        };
        let _ = client.handle(event);

        if let Some(timeline) = client.timeline(ROOM) {
            let mut seen = HashSet::new();
            for message in timeline.messages() {
                assert!(seen.insert(&message.id), "duplicate message {}", message.id);
            }
        }
    }
});
