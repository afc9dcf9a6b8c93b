//! Property tests for the connection manager.
//!
//! These tests verify critical invariants:
//! - At most one transport is open at any time
//! - Reconnect delays stay within `[base, cap]`
//! - A rejected connection never opens a transport on its own

use std::time::Duration;

use proptest::prelude::*;
use quadchat_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, DEFAULT_RECONNECT_BASE,
    DEFAULT_RECONNECT_CAP, SessionContext,
};
use quadchat_proto::{AuthToken, EnginePacket, Identity, OpenHandshake, PacketKind, SocketPacket};
use serde_json::json;
use url::Url;

#[derive(Debug, Clone)]
enum Step {
    Advance(u64),
    Drop,
    ServerOpen,
    ServerConnect,
    ServerReject,
    Open(u8),
    Close,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u64..40_000).prop_map(Step::Advance),
        Just(Step::Drop),
        Just(Step::ServerOpen),
        Just(Step::ServerConnect),
        Just(Step::ServerReject),
        (0u8..3).prop_map(Step::Open),
        Just(Step::Close),
    ]
}

fn session(user: u8) -> SessionContext {
    SessionContext::new(
        Identity::new(format!("u{user}"), "User", AuthToken::new(format!("tok-{user}"))),
        Url::parse("http://localhost:5000").unwrap(),
    )
}

/// Tracks open transports from the action stream.
fn apply(open: &mut i32, actions: &[ConnectionAction]) {
    for action in actions {
        match action {
            ConnectionAction::Open { .. } => *open += 1,
            ConnectionAction::Close { .. } => *open -= 1,
            _ => {},
        }
        assert!((0..=1).contains(open), "transport count out of range: {open}");
    }
}

proptest! {
    /// INVARIANT: the action stream never implies two live transports or a
    /// close without an open.
    #[test]
    fn single_transport(steps in proptest::collection::vec(step(), 1..60)) {
        let mut now = Duration::ZERO;
        let mut conn: Connection<Duration> = Connection::new(now, ConnectionConfig::default());
        let mut open = 0;

        for step in steps {
            let actions = match step {
                Step::Advance(ms) => {
                    now += Duration::from_millis(ms);
                    conn.tick(now)
                },
                Step::Drop => conn.transport_dropped("simulated", now),
                Step::ServerOpen => conn
                    .handle_packet(
                        EnginePacket::Open(OpenHandshake {
                            sid: "s".into(),
                            upgrades: vec![],
                            ping_interval: 25_000,
                            ping_timeout: 20_000,
                            max_payload: 0,
                        }),
                        now,
                    )
                    .unwrap_or_default(),
                Step::ServerConnect => conn
                    .handle_packet(
                        EnginePacket::Message(SocketPacket::connect("/chat", json!({"sid": "x"}))),
                        now,
                    )
                    .unwrap_or_default(),
                Step::ServerReject => conn
                    .handle_packet(
                        EnginePacket::Message(SocketPacket {
                            kind: PacketKind::ConnectError,
                            namespace: "/chat".into(),
                            ack_id: None,
                            data: Some(json!({"message": "nope"})),
                        }),
                        now,
                    )
                    .unwrap_or_default(),
                Step::Open(user) => conn.open(session(user), now).unwrap(),
                Step::Close => conn.close(),
            };
            apply(&mut open, &actions);

            let live = matches!(
                conn.state(),
                ConnectionState::Connecting
                    | ConnectionState::Handshaking
                    | ConnectionState::Connected
            );
            prop_assert_eq!(open == 1, live);
        }
    }

    /// INVARIANT: backoff is monotonic in the attempt count and bounded.
    #[test]
    fn backoff_bounded(attempt in 0u32..200) {
        let conn: Connection<Duration> =
            Connection::new(Duration::ZERO, ConnectionConfig::default());
        let delay = conn.backoff_delay(attempt);
        prop_assert!(delay >= DEFAULT_RECONNECT_BASE);
        prop_assert!(delay <= DEFAULT_RECONNECT_CAP);
        prop_assert!(conn.backoff_delay(attempt + 1) >= delay);
    }
}

#[test]
fn rejected_stays_down_across_time() {
    let mut now = Duration::ZERO;
    let mut conn: Connection<Duration> = Connection::new(now, ConnectionConfig::default());
    conn.open(session(1), now).unwrap();
    conn.handle_packet(
        EnginePacket::Open(OpenHandshake {
            sid: "s".into(),
            upgrades: vec![],
            ping_interval: 1_000,
            ping_timeout: 1_000,
            max_payload: 0,
        }),
        now,
    )
    .unwrap();
    conn.handle_packet(
        EnginePacket::Message(SocketPacket {
            kind: PacketKind::ConnectError,
            namespace: "/chat".into(),
            ack_id: None,
            data: None,
        }),
        now,
    )
    .unwrap();

    for _ in 0..100 {
        now += Duration::from_secs(60);
        assert!(conn.tick(now).is_empty());
    }
    assert_eq!(conn.state(), ConnectionState::Rejected);
}
