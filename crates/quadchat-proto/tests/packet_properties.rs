//! Property-based tests for the text packet codec.
//!
//! Frames come from an untrusted socket, so decoding must reject garbage
//! without panicking, and every packet the client builds must survive the
//! trip through the wire format.

use proptest::prelude::*;
use quadchat_proto::{CHAT_NAMESPACE, EnginePacket, PacketKind, SocketPacket};
use serde_json::{Value, json};

/// JSON values without floats, which do not compare exactly after a trip.
fn arbitrary_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        ".{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z_]{1,8}", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn arbitrary_namespace() -> impl Strategy<Value = String> {
    prop_oneof![Just("/".to_string()), Just(CHAT_NAMESPACE.to_string()), "/[a-z]{1,8}"]
}

fn arbitrary_packet() -> impl Strategy<Value = SocketPacket> {
    (
        arbitrary_namespace(),
        "[a-z-]{1,16}",
        prop::collection::vec(arbitrary_value(), 0..4),
        proptest::option::of(any::<u64>()),
        any::<bool>(),
    )
        .prop_map(|(namespace, name, args, ack_id, is_ack)| match (is_ack, ack_id) {
            (true, Some(id)) => SocketPacket::ack(&namespace, id, args),
            _ => SocketPacket::event(&namespace, &name, args, ack_id),
        })
}

proptest! {
    /// Arbitrary text never panics the decoder.
    #[test]
    fn decode_never_panics(text in ".{0,64}") {
        let _ = EnginePacket::decode(&text);
        let _ = SocketPacket::decode(&text);
    }

    /// Arbitrary text behind a valid engine and socket prefix never panics
    /// either; this reaches the namespace, ack id and JSON stages.
    #[test]
    fn decode_prefixed_never_panics(kind in 0u8..7, body in ".{0,64}") {
        let _ = EnginePacket::decode(&format!("4{kind}{body}"));
        let _ = EnginePacket::decode(&format!("42/chat,{body}"));
    }

    /// Events and acks built by the client decode to the same packet.
    #[test]
    fn built_packets_survive_the_wire(packet in arbitrary_packet()) {
        let wire = EnginePacket::Message(packet.clone()).encode().unwrap();
        prop_assert!(wire.starts_with('4'));

        let EnginePacket::Message(decoded) = EnginePacket::decode(&wire).unwrap() else {
            panic!("not a message: {wire}");
        };
        prop_assert_eq!(&decoded, &packet);
        if decoded.kind == PacketKind::Event {
            prop_assert!(decoded.as_event().is_some());
        }
    }

    /// The connect auth object is carried unchanged.
    #[test]
    fn connect_auth_survives_the_wire(token in "[A-Za-z0-9._-]{1,40}") {
        let packet = SocketPacket::connect(CHAT_NAMESPACE, json!({ "token": token }));
        let wire = packet.encode().unwrap();
        prop_assert_eq!(SocketPacket::decode(&wire).unwrap(), packet);
    }
}
