//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` provides the same interface as the terminal driver but for
//! deterministic testing. It implements [`Driver`] so the same
//! [`quadchat_app::Runtime`] orchestration code runs in both production and
//! simulation. The socket is a connection on a [`SharedSimServer`]; user
//! input is a script of [`SimStep`]s.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use quadchat_app::{Command, Driver, Input};
use quadchat_client::{Client, DownloadTarget, Notice};
use quadchat_core::Environment;
use thiserror::Error;
use url::Url;

use crate::{
    SimEnv,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_server::{ConnId, SharedSimServer},
};

/// Error type for simulation driver.
#[derive(Debug, Clone, Error)]
#[error("sim driver: {0}")]
pub struct SimDriverError(pub String);

/// One step of a simulated user's script.
#[derive(Debug, Clone)]
pub enum SimStep {
    /// Hand the runtime a command.
    Command(Command),
    /// Hold further steps until the client reports it is connected.
    WaitOnline,
    /// Hold further steps for this much virtual time.
    Pause(Duration),
}

impl From<Command> for SimStep {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

/// Shared state for observation.
///
/// The runtime consumes its driver, so everything a test wants to look at
/// afterwards lives here.
#[derive(Debug, Default)]
struct SharedState {
    script: VecDeque<SimStep>,
    notices: Vec<Notice>,
    errors: Vec<String>,
    saved: Vec<(DownloadTarget, Bytes)>,
    progress: BTreeMap<u64, Vec<u8>>,
    snapshot: Option<ClientSnapshot>,
    opens: usize,
    online: bool,
    stopped: bool,
}

/// What the driver can hand over without waiting.
enum Ready {
    Input(Option<Input>),
    Wait,
}

/// Simulation driver for deterministic testing.
///
/// Implements [`Driver`] so the same [`quadchat_app::Runtime`] orchestration
/// code runs in both the terminal client and simulation tests.
pub struct SimDriver {
    env: SimEnv,
    server: SharedSimServer,
    conn: Option<ConnId>,
    refused_opens: usize,
    pause_until: Option<Duration>,
    state: Arc<Mutex<SharedState>>,
    invariants: Option<InvariantRegistry>,
}

impl SimDriver {
    /// Driver for one user on `server`, following `script`.
    pub fn new(
        env: SimEnv,
        server: SharedSimServer,
        script: impl IntoIterator<Item = SimStep>,
    ) -> Self {
        let state = SharedState { script: script.into_iter().collect(), ..Default::default() };
        Self {
            env,
            server,
            conn: None,
            refused_opens: 0,
            pause_until: None,
            state: Arc::new(Mutex::new(state)),
            invariants: None,
        }
    }

    /// Enable invariant checking after every presented notice.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Fail the first `count` socket opens.
    #[must_use]
    pub fn refusing_opens(mut self, count: usize) -> Self {
        self.refused_opens = count;
        self
    }

    /// Handle for reading what the driver saw, usable after the runtime has
    /// consumed the driver.
    pub fn observer(&self) -> SimObserver {
        SimObserver { state: Arc::clone(&self.state) }
    }

    /// Append a step to the script.
    pub fn push_step(&self, step: SimStep) {
        self.lock().script.push_back(step);
    }

    /// Server connection, while one is open.
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Socket traffic first, then the script.
    fn ready(&mut self) -> Ready {
        if let Some(conn) = self.conn {
            let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
            if !server.is_open(conn) {
                drop(server);
                self.conn = None;
                return Ready::Input(Some(Input::TransportClosed {
                    reason: "closed by server".into(),
                }));
            }
            if let Some(frame) = server.pop_frame(conn) {
                return Ready::Input(Some(Input::Frame(frame)));
            }
        }

        let now = self.env.elapsed();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match state.script.front() {
                None => return Ready::Input(None),
                Some(SimStep::Command(_)) => {
                    let Some(SimStep::Command(command)) = state.script.pop_front() else {
                        return Ready::Wait;
                    };
                    return Ready::Input(Some(Input::Command(command)));
                },
                Some(SimStep::WaitOnline) => {
                    if !state.online {
                        return Ready::Wait;
                    }
                    state.script.pop_front();
                },
                Some(SimStep::Pause(duration)) => {
                    let deadline = *self.pause_until.get_or_insert(now + *duration);
                    if now < deadline {
                        return Ready::Wait;
                    }
                    self.pause_until = None;
                    state.script.pop_front();
                },
            }
        }
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn next_input(&mut self) -> Result<Option<Input>, SimDriverError> {
        match self.ready() {
            Ready::Input(input) => Ok(input),
            // The runtime's poll timer moves the clock and retries.
            Ready::Wait => std::future::pending().await,
        }
    }

    async fn open(&mut self, url: &Url) -> Result<(), SimDriverError> {
        self.lock().opens += 1;
        if self.refused_opens > 0 {
            self.refused_opens -= 1;
            return Err(SimDriverError(format!("connection refused: {url}")));
        }

        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stale) = self.conn.take() {
            server.disconnect(stale);
        }
        self.conn = Some(server.connect());
        Ok(())
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), SimDriverError> {
        let Some(conn) = self.conn else {
            return Err(SimDriverError("socket not open".into()));
        };
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        server.receive(conn, &frame).map_err(|e| SimDriverError(e.to_string()))
    }

    fn close(&mut self, reason: &str) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(conn, reason, "closing simulated socket");
            self.server.lock().unwrap_or_else(PoisonError::into_inner).disconnect(conn);
        }
    }

    fn present<E: Environment>(
        &mut self,
        client: &Client<E>,
        notice: &Notice,
    ) -> Result<(), SimDriverError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match notice {
            Notice::ConnectionChanged { connected } => state.online = *connected,
            Notice::UploadProgress { batch_id, percent } => {
                state.progress.entry(*batch_id).or_default().push(*percent);
            },
            _ => {},
        }
        state.notices.push(notice.clone());

        let snapshot = ClientSnapshot::capture(0, client).with_progress(state.progress.clone());
        if let Some(registry) = &self.invariants {
            registry.assert_all(&SystemSnapshot::single(snapshot.clone()), "after notice");
        }
        // Sign-out empties the client; keep what the user last saw.
        if client.identity().is_some() {
            state.snapshot = Some(snapshot);
        }
        Ok(())
    }

    fn report_error(&mut self, message: &str) -> Result<(), SimDriverError> {
        self.lock().errors.push(message.to_string());
        Ok(())
    }

    fn save_file(&mut self, target: &DownloadTarget, data: Bytes) -> Result<(), SimDriverError> {
        self.lock().saved.push((target.clone(), data));
        Ok(())
    }

    fn stop(&mut self) {
        self.close("driver stopped");
        self.lock().stopped = true;
    }
}

/// Read side of a [`SimDriver`].
#[derive(Debug, Clone)]
pub struct SimObserver {
    state: Arc<Mutex<SharedState>>,
}

impl SimObserver {
    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every notice presented, in order.
    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.clone()
    }

    /// Errors reported to the user.
    pub fn errors(&self) -> Vec<String> {
        self.lock().errors.clone()
    }

    /// Files saved from downloads.
    pub fn saved(&self) -> Vec<(DownloadTarget, Bytes)> {
        self.lock().saved.clone()
    }

    /// Upload percentages per batch.
    pub fn progress(&self) -> BTreeMap<u64, Vec<u8>> {
        self.lock().progress.clone()
    }

    /// Client state as of the last notice while signed in.
    pub fn last_snapshot(&self) -> Option<ClientSnapshot> {
        self.lock().snapshot.clone()
    }

    /// Socket open attempts, refused ones included.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Whether the client last reported itself connected.
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Whether the runtime stopped the driver.
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Script steps not yet consumed.
    pub fn remaining_steps(&self) -> usize {
        self.lock().script.len()
    }
}
