//! Synchronous multi-client world.
//!
//! `TestCluster` wires several [`Client`]s to one [`SimServer`] without any
//! async runtime: every action a client returns is executed immediately,
//! except frames and HTTP calls, which queue until [`TestCluster::pump`]
//! delivers them. Tests decide exactly when traffic moves, so races such as
//! an echo overtaking its ack are written down rather than hoped for.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use quadchat_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, LocalFile, Notice,
};
use quadchat_core::{Environment, SessionContext};
use quadchat_proto::{AuthToken, Identity, Message, MessageId, RoomId};
use thiserror::Error;
use url::Url;

use crate::{
    SimEnv,
    invariants::{ClientSnapshot, InvariantRegistry, SystemSnapshot},
    sim_env::SimInstant,
    sim_server::{ConnId, SimServer, SimServerError},
};

/// Base URL every simulated client signs in against.
pub const SIM_SERVER_URL: &str = "http://campus.test";

/// Bound on delivery rounds in one [`TestCluster::pump`].
const MAX_PUMP_ROUNDS: usize = 1_000;

/// Errors surfaced by the simulated world.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A client rejected an event.
    #[error("client {index}: {source}")]
    Client {
        /// Client position.
        index: usize,
        /// What the client reported.
        #[source]
        source: ClientError,
    },

    /// The server rejected a frame.
    #[error(transparent)]
    Server(#[from] SimServerError),

    /// Traffic kept flowing past the round limit.
    #[error("no quiescence after {0} rounds")]
    NoQuiescence(usize),

    /// No client at that position.
    #[error("no client {0}")]
    NoSuchClient(usize),
}

/// An HTTP call waiting for [`TestCluster::pump`].
#[derive(Debug, Clone)]
enum HttpCall {
    /// `snapshot` is set when the server read the room at request time.
    History { room_id: RoomId, snapshot: Option<Result<Vec<Message>, String>> },
    Upload { batch_id: u64, files: Vec<LocalFile> },
    Favorite { message_id: MessageId, favorite: bool },
}

/// One client and the I/O state around it.
pub struct SimClient {
    client: Client<SimEnv>,
    session: SessionContext,
    conn: Option<ConnId>,
    /// Network unreachable: opens are refused.
    partitioned: bool,
    /// An open was refused and the client has not been told yet.
    refused: bool,
    http: VecDeque<HttpCall>,
    notices: Vec<Notice>,
    progress: BTreeMap<u64, Vec<u8>>,
}

impl SimClient {
    /// The client state machine.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// Session the client signs in with.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Server connection, while one is open.
    pub fn conn(&self) -> Option<ConnId> {
        self.conn
    }

    /// Every notice presented so far.
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Upload percentages per batch, in the order they were presented.
    pub fn progress(&self) -> &BTreeMap<u64, Vec<u8>> {
        &self.progress
    }

    /// HTTP calls not yet answered.
    pub fn http_in_flight(&self) -> usize {
        self.http.len()
    }
}

/// Deterministic world of clients around one server.
pub struct TestCluster {
    env: SimEnv,
    server: SimServer,
    clients: Vec<SimClient>,
    config: ClientConfig,
    invariants: Option<InvariantRegistry>,
    history_at_request: bool,
}

impl TestCluster {
    /// Empty world whose randomness is fixed by `seed`.
    pub fn new(seed: u64) -> Self {
        let env = SimEnv::with_seed(seed);
        Self {
            server: SimServer::new(env.clone()),
            env,
            clients: Vec::new(),
            config: ClientConfig::default(),
            invariants: None,
            history_at_request: false,
        }
    }

    /// Check these invariants after every event.
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// Read history when the request is made instead of when it is
    /// answered, so messages posted in between reach the client only by
    /// push.
    #[must_use]
    pub fn with_history_at_request(mut self) -> Self {
        self.history_at_request = true;
        self
    }

    /// Configuration for clients added from now on.
    #[must_use]
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Register `user_id` on the server and add a signed-out client for it.
    /// Returns the client's position.
    pub fn add_client(&mut self, user_id: &str, name: &str) -> usize {
        let token = format!("tok-{user_id}");
        self.server.add_user(user_id, name, &token);

        let identity = Identity::new(user_id, name, AuthToken::new(token));
        let server_url =
            Url::parse(SIM_SERVER_URL).unwrap_or_else(|e| unreachable!("{SIM_SERVER_URL}: {e}"));
        let session = SessionContext::new(identity, server_url);

        self.clients.push(SimClient {
            client: Client::new(self.env.clone(), self.config.clone()),
            session,
            conn: None,
            partitioned: false,
            refused: false,
            http: VecDeque::new(),
            notices: Vec::new(),
            progress: BTreeMap::new(),
        });
        self.clients.len() - 1
    }

    /// Sign client `index` in and deliver everything that follows.
    ///
    /// # Errors
    ///
    /// See [`Self::pump`].
    pub fn sign_in(&mut self, index: usize) -> Result<(), ClusterError> {
        let session = self.sim(index)?.session.clone();
        self.handle(index, ClientEvent::SignIn(session))?;
        self.pump()
    }

    /// Feed one event to client `index` and execute its actions. Frames and
    /// HTTP calls stay queued until [`Self::pump`].
    ///
    /// # Errors
    ///
    /// Whatever the client rejects.
    pub fn handle(
        &mut self,
        index: usize,
        event: ClientEvent<SimInstant>,
    ) -> Result<(), ClusterError> {
        let sim = self.clients.get_mut(index).ok_or(ClusterError::NoSuchClient(index))?;
        let actions =
            sim.client.handle(event).map_err(|source| ClusterError::Client { index, source })?;
        self.execute(index, actions)?;
        self.check("after event");
        Ok(())
    }

    /// Deliver queued frames and answer queued HTTP calls until nothing is
    /// left to move.
    ///
    /// # Errors
    ///
    /// A client or the server rejecting traffic, or traffic that never
    /// settles.
    pub fn pump(&mut self) -> Result<(), ClusterError> {
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut moved = false;
            for index in 0..self.clients.len() {
                moved |= self.deliver_frames(index)?;
            }
            for index in 0..self.clients.len() {
                moved |= self.answer_http(index)?;
            }
            if !moved {
                return Ok(());
            }
        }
        Err(ClusterError::NoQuiescence(MAX_PUMP_ROUNDS))
    }

    /// Move the clock and tick every client.
    ///
    /// # Errors
    ///
    /// Whatever a client rejects.
    pub fn advance(&mut self, by: Duration) -> Result<(), ClusterError> {
        self.env.advance(by);
        let now = self.env.now();
        for index in 0..self.clients.len() {
            self.handle(index, ClientEvent::Tick { now })?;
        }
        Ok(())
    }

    /// Engine.IO ping from the server to every connection.
    pub fn heartbeat(&mut self) {
        self.server.heartbeat();
    }

    /// Cut client `index`'s connection the way a network failure would.
    ///
    /// # Errors
    ///
    /// Whatever the client rejects.
    pub fn drop_connection(&mut self, index: usize) -> Result<(), ClusterError> {
        let Some(conn) = self.sim_mut(index)?.conn.take() else {
            return Ok(());
        };
        self.server.disconnect(conn);
        self.handle(index, ClientEvent::TransportClosed { reason: "connection reset".into() })
    }

    /// Cut client `index` off the network: the connection drops and every
    /// reconnect is refused until [`Self::heal`].
    ///
    /// # Errors
    ///
    /// Whatever the client rejects.
    pub fn partition(&mut self, index: usize) -> Result<(), ClusterError> {
        self.sim_mut(index)?.partitioned = true;
        self.drop_connection(index)
    }

    /// Let client `index` reach the server again. It reconnects on its own
    /// schedule.
    ///
    /// # Errors
    ///
    /// If there is no such client.
    pub fn heal(&mut self, index: usize) -> Result<(), ClusterError> {
        self.sim_mut(index)?.partitioned = false;
        Ok(())
    }

    /// Client `index`.
    ///
    /// # Panics
    ///
    /// If there is no such client.
    pub fn client(&self, index: usize) -> &SimClient {
        &self.clients[index]
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the world has no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// The shared clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The server.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// The server, for setup and fault injection.
    pub fn server_mut(&mut self) -> &mut SimServer {
        &mut self.server
    }

    /// Observable state of every client.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_clients(
            self.clients
                .iter()
                .enumerate()
                .map(|(index, sim)| {
                    ClientSnapshot::capture(index, &sim.client).with_progress(sim.progress.clone())
                })
                .collect(),
        )
    }

    fn sim(&self, index: usize) -> Result<&SimClient, ClusterError> {
        self.clients.get(index).ok_or(ClusterError::NoSuchClient(index))
    }

    fn sim_mut(&mut self, index: usize) -> Result<&mut SimClient, ClusterError> {
        self.clients.get_mut(index).ok_or(ClusterError::NoSuchClient(index))
    }

    fn check(&self, context: &str) {
        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(), context);
        }
    }

    fn execute(&mut self, index: usize, actions: Vec<ClientAction>) -> Result<(), ClusterError> {
        for action in actions {
            let sim = self.sim_mut(index)?;
            match action {
                ClientAction::OpenTransport { url } => {
                    tracing::trace!(index, %url, "opening socket");
                    let stale = sim.conn.take();
                    if sim.partitioned {
                        sim.refused = true;
                    }
                    let refused = sim.refused;
                    if let Some(stale) = stale {
                        self.server.disconnect(stale);
                    }
                    if refused {
                        continue;
                    }
                    let conn = self.server.connect();
                    self.sim_mut(index)?.conn = Some(conn);
                },
                ClientAction::CloseTransport { reason } => {
                    tracing::trace!(index, %reason, "closing socket");
                    if let Some(conn) = sim.conn.take() {
                        self.server.disconnect(conn);
                    }
                },
                ClientAction::SendFrame(text) => {
                    match sim.conn.filter(|conn| self.server.is_open(*conn)) {
                        Some(conn) => self.server.receive(conn, &text)?,
                        None => tracing::trace!(index, "frame written to a dead socket"),
                    }
                },
                ClientAction::LoadHistory { room_id } => {
                    let token = sim.session.identity.auth_token.expose().to_string();
                    let snapshot = self
                        .history_at_request
                        .then(|| self.server.history(&token, &room_id));
                    self.sim_mut(index)?.http.push_back(HttpCall::History { room_id, snapshot });
                },
                ClientAction::Upload { batch_id, files } => {
                    sim.http.push_back(HttpCall::Upload { batch_id, files });
                },
                ClientAction::SetFavorite { message_id, favorite } => {
                    sim.http.push_back(HttpCall::Favorite { message_id, favorite });
                },
                ClientAction::Notify(notice) => {
                    if let Notice::UploadProgress { batch_id, percent } = notice {
                        sim.progress.entry(batch_id).or_default().push(percent);
                    }
                    sim.notices.push(notice);
                },
            }
        }
        Ok(())
    }

    /// Drain client `index`'s socket. Returns whether anything moved.
    fn deliver_frames(&mut self, index: usize) -> Result<bool, ClusterError> {
        if std::mem::take(&mut self.sim_mut(index)?.refused) {
            let refused = ClientEvent::TransportClosed { reason: "connection refused".into() };
            self.handle(index, refused)?;
            return Ok(true);
        }

        let mut moved = false;
        loop {
            let Some(conn) = self.sim(index)?.conn else {
                return Ok(moved);
            };
            if !self.server.is_open(conn) {
                self.sim_mut(index)?.conn = None;
                let closed = ClientEvent::TransportClosed { reason: "closed by server".into() };
                self.handle(index, closed)?;
                return Ok(true);
            }
            let Some(frame) = self.server.pop_frame(conn) else {
                return Ok(moved);
            };
            moved = true;
            self.handle(index, ClientEvent::FrameReceived(frame))?;
        }
    }

    /// Answer client `index`'s queued HTTP calls. Returns whether anything
    /// moved.
    fn answer_http(&mut self, index: usize) -> Result<bool, ClusterError> {
        let calls: Vec<HttpCall> = self.sim_mut(index)?.http.drain(..).collect();
        let moved = !calls.is_empty();
        let token = self.sim(index)?.session.identity.auth_token.expose().to_string();

        for call in calls {
            match call {
                HttpCall::History { room_id, snapshot } => {
                    let result =
                        snapshot.unwrap_or_else(|| self.server.history(&token, &room_id));
                    self.handle(index, ClientEvent::HistoryLoaded { room_id, result })?;
                },
                HttpCall::Upload { batch_id, files } => {
                    let total: u64 = files.iter().map(LocalFile::len).sum();
                    for sent in [0, total / 2, total] {
                        self.handle(index, ClientEvent::UploadProgress { batch_id, sent, total })?;
                    }
                    let result = self.server.upload(&token, &files);
                    self.handle(index, ClientEvent::UploadCompleted { batch_id, result })?;
                },
                HttpCall::Favorite { message_id, favorite } => {
                    let result = self.server.set_favorite(&token, &message_id, favorite);
                    self.handle(
                        index,
                        ClientEvent::FavoriteCompleted { message_id, favorite, result },
                    )?;
                },
            }
        }
        Ok(moved)
    }
}
