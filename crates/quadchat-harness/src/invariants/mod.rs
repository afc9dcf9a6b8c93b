//! Invariant checking for deterministic simulation testing.
//!
//! A chat session has properties that no interleaving of frames, timers and
//! HTTP completions may break: a focused room is always joined, a message is
//! never shown twice, nobody sees themselves typing. The harness captures
//! every client into a [`SystemSnapshot`] after each event and runs the
//! registered [`Invariant`]s over it.
//!
//! Two sets exist. [`InvariantRegistry::standard`] holds after every event.
//! [`InvariantRegistry::quiescent`] adds checks that only hold once nothing
//! is in flight, such as every client agreeing on a room's sent messages.
//!
//! ```ignore
//! let mut cluster = TestCluster::new(7).with_invariants(InvariantRegistry::standard());
//! // ... drive the world, then let it settle ...
//! InvariantRegistry::quiescent().assert_all(&cluster.snapshot(), "after settle");
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    FocusedRoomJoined, FocusedRoomRead, LocalStatusOwnership, NoEchoDuplicates,
    ProgressMonotonicity, SentMessagesConverge, TypingExcludesSelf, UniqueMessageIds,
};
use quadchat_proto::RoomId;
pub use snapshot::{ClientSnapshot, MessageSnapshot, RoomSnapshot, SystemSnapshot};

/// Which invariant was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvariantKind {
    /// See [`FocusedRoomJoined`].
    FocusedRoomJoined,
    /// See [`UniqueMessageIds`].
    UniqueMessageIds,
    /// See [`NoEchoDuplicates`].
    NoEchoDuplicates,
    /// See [`LocalStatusOwnership`].
    LocalStatusOwnership,
    /// See [`TypingExcludesSelf`].
    TypingExcludesSelf,
    /// See [`FocusedRoomRead`].
    FocusedRoomRead,
    /// See [`ProgressMonotonicity`].
    ProgressMonotonicity,
    /// See [`SentMessagesConverge`].
    SentMessagesConverge,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A broken invariant, located as precisely as the check could.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The violated invariant.
    pub invariant: InvariantKind,
    /// Client position in its world, if one client is at fault.
    pub client: Option<usize>,
    /// Room the problem was seen in.
    pub room: Option<RoomId>,
    /// What was observed.
    pub detail: String,
}

impl Violation {
    /// Violation with no location yet.
    pub fn new(invariant: InvariantKind, detail: impl Into<String>) -> Self {
        Self { invariant, client: None, room: None, detail: detail.into() }
    }

    /// Attribute the violation to one client.
    #[must_use]
    pub fn on_client(mut self, client: usize) -> Self {
        self.client = Some(client);
        self
    }

    /// Attribute the violation to one room.
    #[must_use]
    pub fn in_room(mut self, room: &str) -> Self {
        self.room = Some(room.to_string());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.invariant)?;
        match (self.client, &self.room) {
            (Some(client), Some(room)) => write!(f, " [client {client}, room {room}]")?,
            (Some(client), None) => write!(f, " [client {client}]")?,
            (None, Some(room)) => write!(f, " [room {room}]")?,
            (None, None) => {},
        }
        write!(f, ": {}", self.detail)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Which invariant this is.
    fn kind(&self) -> InvariantKind;

    /// First violation found, if any.
    fn check(&self, state: &SystemSnapshot) -> Result<(), Violation>;
}

/// An ordered set of invariants.
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No checks at all.
    pub fn empty() -> Self {
        Self { checks: Vec::new() }
    }

    /// Properties that hold after every processed event:
    ///
    /// - [`FocusedRoomJoined`]
    /// - [`UniqueMessageIds`]
    /// - [`NoEchoDuplicates`]
    /// - [`LocalStatusOwnership`]
    /// - [`TypingExcludesSelf`]
    /// - [`FocusedRoomRead`]
    /// - [`ProgressMonotonicity`]
    pub fn standard() -> Self {
        Self::empty()
            .with(FocusedRoomJoined)
            .with(UniqueMessageIds)
            .with(NoEchoDuplicates)
            .with(LocalStatusOwnership)
            .with(TypingExcludesSelf)
            .with(FocusedRoomRead)
            .with(ProgressMonotonicity)
    }

    /// [`Self::standard`] plus [`SentMessagesConverge`], for worlds with
    /// no frames or HTTP responses in flight.
    pub fn quiescent() -> Self {
        Self::standard().with(SentMessagesConverge)
    }

    /// Add a check.
    #[must_use]
    pub fn with<I: Invariant + 'static>(mut self, invariant: I) -> Self {
        self.checks.push(Box::new(invariant));
        self
    }

    /// The registered invariants, in check order.
    pub fn kinds(&self) -> Vec<InvariantKind> {
        self.checks.iter().map(|check| check.kind()).collect()
    }

    /// Run every check; collect one violation per broken invariant.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<Violation> =
            self.checks.iter().filter_map(|check| check.check(state).err()).collect();
        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Panic listing every violation, prefixed with `context`.
    #[allow(clippy::panic, reason = "test assertion helper")]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let lines: Vec<String> = violations.iter().map(ToString::to_string).collect();
            panic!("invariants broken {context}:\n  {}", lines.join("\n  "));
        }
    }
}
