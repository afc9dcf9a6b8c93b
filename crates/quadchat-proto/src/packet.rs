//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Wire layout of one WebSocket text frame:
//!
//! ```text
//! <engine type>[payload]
//!
//! engine type: 0 open | 1 close | 2 ping | 3 pong | 4 message | 5 upgrade | 6 noop
//!
//! message payload (Socket.IO):
//! <packet type>[<namespace>,][<ack id>][<json>]
//!
//! packet type: 0 CONNECT | 1 DISCONNECT | 2 EVENT | 3 ACK | 4 CONNECT_ERROR
//! ```
//!
//! The root namespace `/` is omitted on the wire. Binary packet types (5, 6)
//! are rejected: the chat contract only carries JSON.
//!
//! # Invariants
//!
//! - `decode(encode(p)) == p` for every packet this module can construct.
//! - Decoding never panics on arbitrary input; malformed text yields a
//!   [`ProtocolError`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id.
    pub sid: String,
    /// Transports the server allows upgrading to.
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Server ping interval in milliseconds.
    pub ping_interval: u64,
    /// Time the server waits for a pong, in milliseconds.
    pub ping_timeout: u64,
    /// Largest payload the server accepts, in bytes.
    #[serde(default)]
    pub max_payload: u64,
}

/// Engine.IO packet (one WebSocket text frame).
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened by the server.
    Open(OpenHandshake),
    /// Transport close.
    Close,
    /// Heartbeat request (server to client in v4).
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Socket.IO packet.
    Message(SocketPacket),
    /// Transport upgrade marker.
    Upgrade,
    /// No-op.
    Noop,
}

impl EnginePacket {
    /// Encode into the text frame body.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            Self::Open(handshake) => format!("0{}", serde_json::to_string(handshake)?),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Message(packet) => format!("4{}", packet.encode()?),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }

    /// Decode a text frame body.
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let Some(kind) = chars.next() else {
            return Err(ProtocolError::Empty);
        };
        let rest = chars.as_str();

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownEngineType(other)),
        }
    }
}

/// Socket.IO packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketKind {
    /// Namespace connect (request with auth, or server confirmation).
    Connect,
    /// Namespace disconnect.
    Disconnect,
    /// Named event with JSON arguments.
    Event,
    /// Acknowledgement of an event that carried an ack id.
    Ack,
    /// Namespace connect refused (e.g. bad token).
    ConnectError,
}

impl PacketKind {
    fn to_char(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
        }
    }

    fn from_char(c: char) -> Result<Self> {
        match c {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::ConnectError),
            '5' | '6' => Err(ProtocolError::BinaryUnsupported),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketPacket {
    /// Packet type.
    pub kind: PacketKind,
    /// Namespace, `/` for the root namespace.
    pub namespace: String,
    /// Acknowledgement id (requests expecting an ack, and the ack itself).
    pub ack_id: Option<u64>,
    /// JSON body. Events and acks carry an array; connect packets an object.
    pub data: Option<Value>,
}

impl SocketPacket {
    /// Namespace connect request carrying the auth object.
    pub fn connect(namespace: &str, auth: Value) -> Self {
        Self {
            kind: PacketKind::Connect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: Some(auth),
        }
    }

    /// Namespace disconnect.
    pub fn disconnect(namespace: &str) -> Self {
        Self {
            kind: PacketKind::Disconnect,
            namespace: namespace.to_string(),
            ack_id: None,
            data: None,
        }
    }

    /// Named event. The body is `[name, ...args]`.
    pub fn event(namespace: &str, name: &str, args: Vec<Value>, ack_id: Option<u64>) -> Self {
        let mut body = Vec::with_capacity(args.len() + 1);
        body.push(Value::String(name.to_string()));
        body.extend(args);

        Self {
            kind: PacketKind::Event,
            namespace: namespace.to_string(),
            ack_id,
            data: Some(Value::Array(body)),
        }
    }

    /// Acknowledgement carrying `args`.
    pub fn ack(namespace: &str, ack_id: u64, args: Vec<Value>) -> Self {
        Self {
            kind: PacketKind::Ack,
            namespace: namespace.to_string(),
            ack_id: Some(ack_id),
            data: Some(Value::Array(args)),
        }
    }

    /// Event name and arguments. `None` if this is not a well-formed event.
    pub fn as_event(&self) -> Option<(&str, &[Value])> {
        if self.kind != PacketKind::Event {
            return None;
        }
        let Some(Value::Array(items)) = &self.data else {
            return None;
        };
        let (first, args) = items.split_first()?;
        first.as_str().map(|name| (name, args))
    }

    /// Acknowledgement arguments. Empty for non-array bodies.
    pub fn ack_args(&self) -> &[Value] {
        match &self.data {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// Encode into the Engine.IO message body (without the leading `4`).
    pub fn encode(&self) -> Result<String> {
        let mut out = String::new();
        out.push(self.kind.to_char());

        if self.namespace != "/" && !self.namespace.is_empty() {
            out.push_str(&self.namespace);
            out.push(',');
        }

        if let Some(id) = self.ack_id {
            out.push_str(&id.to_string());
        }

        if let Some(data) = &self.data {
            out.push_str(&serde_json::to_string(data)?);
        }

        Ok(out)
    }

    /// Decode an Engine.IO message body (without the leading `4`).
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let Some(kind) = chars.next() else {
            return Err(ProtocolError::Empty);
        };
        let kind = PacketKind::from_char(kind)?;
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((nsp, tail)) => {
                    rest = tail;
                    nsp.to_string()
                },
                None => {
                    let nsp = rest.to_string();
                    rest = "";
                    nsp
                },
            }
        } else {
            "/".to_string()
        };

        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let ack_id = if digits > 0 {
            let raw = &rest[..digits];
            Some(raw.parse::<u64>().map_err(|_| ProtocolError::InvalidAckId(raw.to_string()))?)
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() { None } else { Some(serde_json::from_str(rest)?) };

        Ok(Self { kind, namespace, ack_id, data })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_open_handshake() {
        let text = concat!(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"#,
            r#""pingTimeout":20000,"maxPayload":1000000}"#
        );
        let packet = EnginePacket::decode(text).unwrap();

        match packet {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25_000);
                assert_eq!(handshake.ping_timeout, 20_000);
            },
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[test]
    fn event_with_namespace_and_ack_id() {
        let args = vec![json!({"content": "hi"})];
        let packet = SocketPacket::event("/chat", "send-message", args, Some(12));
        let encoded = EnginePacket::Message(packet.clone()).encode().unwrap();

        assert_eq!(encoded, r#"42/chat,12["send-message",{"content":"hi"}]"#);
        assert_eq!(EnginePacket::decode(&encoded).unwrap(), EnginePacket::Message(packet));
    }

    #[test]
    fn root_namespace_is_omitted() {
        let packet = SocketPacket::event("/", "ping-room", vec![], None);
        assert_eq!(packet.encode().unwrap(), r#"2["ping-room"]"#);

        let decoded = SocketPacket::decode(r#"2["ping-room"]"#).unwrap();
        assert_eq!(decoded.namespace, "/");
        assert_eq!(decoded.as_event(), Some(("ping-room", &[][..])));
    }

    #[test]
    fn disconnect_without_body() {
        let decoded = SocketPacket::decode("1/chat").unwrap();
        assert_eq!(decoded.kind, PacketKind::Disconnect);
        assert_eq!(decoded.namespace, "/chat");
        assert!(decoded.data.is_none());
    }

    #[test]
    fn ack_packet_args() {
        let decoded = SocketPacket::decode(r#"3/chat,7[{"status":"ok"}]"#).unwrap();
        assert_eq!(decoded.kind, PacketKind::Ack);
        assert_eq!(decoded.ack_id, Some(7));
        assert_eq!(decoded.ack_args().len(), 1);
    }

    #[test]
    fn connect_error_packet() {
        let decoded = SocketPacket::decode(r#"4/chat,{"message":"invalid token"}"#).unwrap();
        assert_eq!(decoded.kind, PacketKind::ConnectError);
        assert_eq!(decoded.data, Some(json!({"message": "invalid token"})));
    }

    #[test]
    fn binary_packets_rejected() {
        assert!(matches!(
            SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::BinaryUnsupported)
        ));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        assert!(matches!(EnginePacket::decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(EnginePacket::decode("9"), Err(ProtocolError::UnknownEngineType('9'))));
        assert!(EnginePacket::decode("42/chat,[not json").is_err());
        assert!(SocketPacket::decode("299999999999999999999999[]").is_err());
    }

    #[test]
    fn as_event_rejects_non_string_name() {
        let packet = SocketPacket::decode("2[42]").unwrap();
        assert!(packet.as_event().is_none());
    }
}
