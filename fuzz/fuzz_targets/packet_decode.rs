//! Fuzz target for the text packet codec.
//!
//! Frames arrive from the network, so any byte sequence may show up. The
//! decoder must reject malformed input with an error, never a panic, and
//! typed push decoding must do the same for any well-formed packet.

#![no_main]

use libfuzzer_sys::fuzz_target;
use quadchat_proto::{EnginePacket, SendAck, ServerPush};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(EnginePacket::Message(packet)) = EnginePacket::decode(text) {
        let _ = ServerPush::from_packet(&packet);
        let _ = SendAck::from_args(packet.ack_args());
        let _ = packet.encode();
    }
});
