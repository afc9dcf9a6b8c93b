//! Connection manager state machine.
//!
//! Owns the lifecycle of the single chat transport: opening it for the
//! current identity, the Engine.IO/Socket.IO handshake, heartbeats, and
//! reconnecting with exponential backoff after a drop. Uses the action
//! pattern: methods take time as input and return actions for the driver
//! to execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//!                open(session)
//! ┌──────────────┐ ─────────> ┌────────────┐  engine open  ┌─────────────┐
//! │ Disconnected │            │ Connecting │──────────────>│ Handshaking │
//! └──────────────┘ <───────── └────────────┘               └─────────────┘
//!        ↑          close()          ↑                        │       │
//!        │                           │ retry            CONNECT│       │CONNECT_ERROR
//!        │                     ┌─────────┐                    ↓       ↓
//!        └─────────────────────│ Backoff │<── drop ──┌───────────┐ ┌──────────┐
//!                close()       └─────────┘           │ Connected │ │ Rejected │
//!                                                    └───────────┘ └──────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one transport exists at a time: every `Open` is preceded by a
//!   `Close` for the previous transport, if any.
//! - `Rejected` never reconnects on its own; only a new identity leaves it.
//! - `close()` is idempotent.

use std::{
    ops::Sub,
    time::{Duration, Instant},
};

use quadchat_proto::{ClientEmit, EnginePacket, OpenHandshake, PacketKind, SocketPacket};
use serde_json::{Value, json};
use url::Url;

use crate::{error::ConnectionError, session::SessionContext};

/// Namespace carrying the chat protocol.
pub const DEFAULT_NAMESPACE: &str = quadchat_proto::CHAT_NAMESPACE;

/// Time allowed from opening the transport to the namespace CONNECT reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// First reconnect delay. Doubles per consecutive failure.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(500);

/// Upper bound on the reconnect delay.
pub const DEFAULT_RECONNECT_CAP: Duration = Duration::from_secs(30);

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open a WebSocket to this URL. Any previous transport is already
    /// closed by a preceding `Close`.
    Open {
        /// Engine.IO WebSocket endpoint.
        url: Url,
    },

    /// Write this packet to the transport.
    Send(EnginePacket),

    /// Close the current transport.
    Close {
        /// Reason for closing.
        reason: String,
    },

    /// Namespace handshake completed.
    Established {
        /// Socket.IO session id.
        sid: String,
    },

    /// Chat-level packet (event or ack) for the layers above.
    Deliver(SocketPacket),

    /// Live connection lost; a reconnect is scheduled.
    Lost(ConnectionError),

    /// Server refused the identity. No reconnect will happen.
    Rejected(ConnectionError),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport and no reconnect scheduled.
    Disconnected,
    /// Transport open requested, waiting for the Engine.IO open packet.
    Connecting,
    /// Namespace CONNECT sent, waiting for the reply.
    Handshaking,
    /// Namespace joined; events flow.
    Connected,
    /// Transport lost, waiting for the reconnect deadline.
    Backoff,
    /// Server refused the token.
    Rejected,
}

impl ConnectionState {
    /// Whether a transport handle exists in this state.
    fn has_transport(self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking | Self::Connected)
    }
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Socket.IO namespace to join.
    pub namespace: String,
    /// Timeout for the open + CONNECT handshake.
    pub handshake_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Maximum reconnect delay.
    pub reconnect_cap: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_cap: DEFAULT_RECONNECT_CAP,
        }
    }
}

/// Connection manager for the single chat transport.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    config: ConnectionConfig,
    session: Option<SessionContext>,
    /// Socket.IO session id while connected.
    sid: Option<String>,
    /// Last inbound traffic, or when the current attempt started.
    last_activity: I,
    /// Ping interval + ping timeout from the open handshake.
    idle_window: Option<Duration>,
    /// Consecutive failed attempts since the last successful handshake.
    attempt: u32,
    /// Reconnect timer: when it was armed and for how long.
    retry: Option<(I, Duration)>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a connection manager in [`ConnectionState::Disconnected`].
    pub fn new(now: I, config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            session: None,
            sid: None,
            last_activity: now,
            idle_window: None,
            attempt: 0,
            retry: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether chat events can be emitted right now.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Session the manager is (or was last) connecting for.
    #[must_use]
    pub fn session(&self) -> Option<&SessionContext> {
        self.session.as_ref()
    }

    /// Socket.IO session id while connected.
    #[must_use]
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Namespace chat packets are sent on.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Consecutive failed attempts since the last successful handshake.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Time left until the scheduled reconnect, if one is scheduled.
    #[must_use]
    pub fn retry_in(&self, now: I) -> Option<Duration> {
        self.retry.map(|(armed, delay)| delay.saturating_sub(now - armed))
    }

    /// Delay before reconnect attempt number `attempt` (zero-based).
    ///
    /// `base * 2^attempt`, capped at `reconnect_cap`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config.reconnect_base.saturating_mul(factor).min(self.config.reconnect_cap)
    }

    /// Ensure a transport exists for `session`.
    ///
    /// Same session while not disconnected: no-op. A different identity
    /// closes the old transport first, then opens a new one.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidUrl` if the server URL has no WebSocket form.
    pub fn open(
        &mut self,
        session: SessionContext,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Disconnected && self.session.as_ref() == Some(&session) {
            return Ok(Vec::new());
        }

        let url = session.socket_url()?;
        let mut actions = Vec::new();
        if self.state.has_transport() {
            actions.push(ConnectionAction::Close { reason: "identity changed".to_string() });
        }

        self.session = Some(session);
        self.attempt = 0;
        self.start_attempt(url, now, &mut actions);
        Ok(actions)
    }

    /// Release the transport and stop reconnecting. Idempotent.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        let mut actions = Vec::new();

        if self.state == ConnectionState::Connected {
            actions.push(ConnectionAction::Send(EnginePacket::Message(SocketPacket::disconnect(
                &self.config.namespace,
            ))));
        }
        if self.state.has_transport() {
            actions.push(ConnectionAction::Close { reason: "closed by client".to_string() });
        }

        self.state = ConnectionState::Disconnected;
        self.session = None;
        self.sid = None;
        self.idle_window = None;
        self.retry = None;
        self.attempt = 0;
        actions
    }

    /// The transport reported an error or closed underneath us.
    ///
    /// Schedules a reconnect. Ignored when there is no live transport.
    pub fn transport_dropped(&mut self, reason: &str, now: I) -> Vec<ConnectionAction> {
        if !self.state.has_transport() {
            return Vec::new();
        }
        self.fail(ConnectionError::TransportDropped { reason: reason.to_string() }, now)
    }

    /// Drive timers: handshake timeout, idle timeout, reconnect.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Backoff => {
                let due = self.retry.is_some_and(|(armed, delay)| now - armed >= delay);
                if !due {
                    return Vec::new();
                }
                let url = match self.session.as_ref().map(SessionContext::socket_url) {
                    Some(Ok(url)) => url,
                    // Session URL was validated by `open`; nothing to retry otherwise.
                    _ => {
                        self.state = ConnectionState::Disconnected;
                        return Vec::new();
                    },
                };
                let mut actions = Vec::new();
                self.start_attempt(url, now, &mut actions);
                actions
            },
            ConnectionState::Connecting | ConnectionState::Handshaking => {
                let elapsed = now - self.last_activity;
                if elapsed > self.config.handshake_timeout {
                    self.fail(ConnectionError::HandshakeTimeout { elapsed }, now)
                } else {
                    Vec::new()
                }
            },
            ConnectionState::Connected => {
                let elapsed = now - self.last_activity;
                match self.idle_window {
                    Some(window) if elapsed > window => {
                        self.fail(ConnectionError::IdleTimeout { elapsed }, now)
                    },
                    _ => Vec::new(),
                }
            },
            ConnectionState::Disconnected | ConnectionState::Rejected => Vec::new(),
        }
    }

    /// Process one inbound packet.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::UnexpectedPacket` if the packet is invalid for the
    ///   current state (e.g. an event before the namespace handshake).
    pub fn handle_packet(
        &mut self,
        packet: EnginePacket,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !self.state.has_transport() {
            return Err(self.unexpected(&packet));
        }
        self.last_activity = now;

        match packet {
            EnginePacket::Open(handshake) if self.state == ConnectionState::Connecting => {
                Ok(self.handle_open(&handshake))
            },
            EnginePacket::Ping => Ok(vec![ConnectionAction::Send(EnginePacket::Pong)]),
            EnginePacket::Pong | EnginePacket::Noop | EnginePacket::Upgrade => Ok(Vec::new()),
            EnginePacket::Close => {
                Ok(self.fail(
                    ConnectionError::TransportDropped { reason: "closed by server".to_string() },
                    now,
                ))
            },
            EnginePacket::Message(socket) => self.handle_socket_packet(socket, now),
            EnginePacket::Open(_) => {
                Err(ConnectionError::UnexpectedPacket { state: self.state, packet: "open" })
            },
        }
    }

    fn handle_open(&mut self, handshake: &OpenHandshake) -> Vec<ConnectionAction> {
        self.idle_window = Some(Duration::from_millis(
            handshake.ping_interval.saturating_add(handshake.ping_timeout),
        ));
        self.state = ConnectionState::Handshaking;

        let token = self
            .session
            .as_ref()
            .map(|s| s.identity.auth_token.expose().to_string())
            .unwrap_or_default();
        let connect = SocketPacket::connect(&self.config.namespace, json!({ "token": token }));
        vec![ConnectionAction::Send(EnginePacket::Message(connect))]
    }

    fn handle_socket_packet(
        &mut self,
        socket: SocketPacket,
        now: I,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if socket.namespace != self.config.namespace {
            return Ok(Vec::new());
        }

        match (self.state, socket.kind) {
            (ConnectionState::Handshaking, PacketKind::Connect) => {
                let sid = socket
                    .data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.state = ConnectionState::Connected;
                self.sid = Some(sid.clone());
                self.attempt = 0;
                self.retry = None;

                let mut actions = vec![ConnectionAction::Established { sid }];
                for emit in [ClientEmit::FetchUserList, ClientEmit::PresenceSubscribe] {
                    let packet = emit.into_packet(&self.config.namespace, None)?;
                    actions.push(ConnectionAction::Send(EnginePacket::Message(packet)));
                }
                Ok(actions)
            },
            (ConnectionState::Handshaking, PacketKind::ConnectError) => {
                let reason = socket
                    .data
                    .as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unauthorized")
                    .to_string();
                self.state = ConnectionState::Rejected;
                self.sid = None;
                self.retry = None;
                Ok(vec![
                    ConnectionAction::Close { reason: reason.clone() },
                    ConnectionAction::Rejected(ConnectionError::AuthRejected { reason }),
                ])
            },
            (ConnectionState::Connected, PacketKind::Event | PacketKind::Ack) => {
                Ok(vec![ConnectionAction::Deliver(socket)])
            },
            (ConnectionState::Connected, PacketKind::Disconnect) => Ok(self.fail(
                ConnectionError::TransportDropped { reason: "server disconnect".to_string() },
                now,
            )),
            (state, _) => Err(ConnectionError::UnexpectedPacket { state, packet: "socket" }),
        }
    }

    fn start_attempt(&mut self, url: Url, now: I, actions: &mut Vec<ConnectionAction>) {
        self.state = ConnectionState::Connecting;
        self.sid = None;
        self.idle_window = None;
        self.retry = None;
        self.last_activity = now;
        actions.push(ConnectionAction::Open { url });
    }

    /// Tear down the transport and schedule the next attempt.
    fn fail(&mut self, error: ConnectionError, now: I) -> Vec<ConnectionAction> {
        let delay = self.backoff_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.state = ConnectionState::Backoff;
        self.sid = None;
        self.retry = Some((now, delay));

        vec![ConnectionAction::Close { reason: error.to_string() }, ConnectionAction::Lost(error)]
    }

    fn unexpected(&self, packet: &EnginePacket) -> ConnectionError {
        let packet = match packet {
            EnginePacket::Open(_) => "open",
            EnginePacket::Close => "close",
            EnginePacket::Ping => "ping",
            EnginePacket::Pong => "pong",
            EnginePacket::Message(_) => "message",
            EnginePacket::Upgrade => "upgrade",
            EnginePacket::Noop => "noop",
        };
        ConnectionError::UnexpectedPacket { state: self.state, packet }
    }
}
