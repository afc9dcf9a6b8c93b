//! Error types for the connection layer.
//!
//! These map onto the session failure taxonomy: `AuthRejected` is fatal to
//! the connection, the drop and timeout variants are transient and trigger
//! reconnect, protocol violations indicate a broken peer.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Server refused the token at the namespace handshake.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Server-provided reason.
        reason: String,
    },

    /// Transport closed or failed mid-session.
    #[error("transport dropped: {reason}")]
    TransportDropped {
        /// What closed the transport.
        reason: String,
    },

    /// Open/connect handshake did not complete in time.
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited.
        elapsed: Duration,
    },

    /// No traffic (not even a ping) within the negotiated window.
    #[error("idle timeout after {elapsed:?}")]
    IdleTimeout {
        /// How long the transport was silent.
        elapsed: Duration,
    },

    /// Packet not valid for the current state.
    #[error("unexpected {packet} packet in state {state:?}")]
    UnexpectedPacket {
        /// State when the packet arrived.
        state: ConnectionState,
        /// Packet description.
        packet: &'static str,
    },

    /// Malformed packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Server URL cannot be turned into an endpoint.
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
}

impl ConnectionError {
    /// Returns true if the connection manager will retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportDropped { .. } | Self::HandshakeTimeout { .. } | Self::IdleTimeout { .. }
        )
    }
}

impl From<quadchat_proto::ProtocolError> for ConnectionError {
    fn from(err: quadchat_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_and_timeouts_are_transient() {
        assert!(ConnectionError::TransportDropped { reason: "reset".into() }.is_transient());
        assert!(
            ConnectionError::HandshakeTimeout { elapsed: Duration::from_secs(21) }.is_transient()
        );
        assert!(ConnectionError::IdleTimeout { elapsed: Duration::from_secs(46) }.is_transient());
    }

    #[test]
    fn auth_and_protocol_errors_are_not_retried() {
        assert!(!ConnectionError::AuthRejected { reason: "bad token".into() }.is_transient());
        assert!(!ConnectionError::Protocol("garbage".into()).is_transient());
        assert!(
            !ConnectionError::UnexpectedPacket {
                state: ConnectionState::Disconnected,
                packet: "open"
            }
            .is_transient()
        );
    }
}
