//! Generic runtime for application orchestration.
//!
//! The Runtime drives the event loop, coordinating between:
//! - [`Client`]: chat session state machine
//! - [`Driver`]: platform-specific I/O
//! - [`ChatApi`]: HTTP collaborator
//!
//! HTTP calls run as futures polled by the loop itself rather than spawned
//! tasks, so the client is only touched from here and every event is
//! processed to completion before the next one.

use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use futures::{StreamExt, future::BoxFuture, stream::FuturesUnordered};
use quadchat_client::{
    Client, ClientAction, ClientConfig, ClientEvent, DownloadTarget, LocalFile, download_target,
};
use quadchat_core::{Environment, SessionContext};
use quadchat_proto::{MessageId, RoomId};
use tokio::sync::mpsc;

use crate::{ChatApi, Command, Driver, Input, ProgressReport, ProgressSink};

/// How often the client is ticked when nothing else happens.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

const NOT_SIGNED_IN: &str = "not signed in";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Tick interval for timers (typing debounce, ack deadlines, reconnect).
    pub poll_interval: Duration,
    /// Client state machine settings.
    pub client: ClientConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, client: ClientConfig::default() }
    }
}

/// Finished HTTP work.
enum Completion<I> {
    /// Result the client consumes.
    Client(ClientEvent<I>),
    /// Attachment bytes for the driver to store.
    Download { target: DownloadTarget, result: Result<Bytes, String> },
}

/// What woke the loop.
enum Step<I, Err> {
    Input(Result<Option<Input>, Err>),
    Completed(Completion<I>),
    Progress(ProgressReport),
    Tick,
}

/// Generic runtime that orchestrates Client, Driver and `ChatApi`.
///
/// # Type Parameters
///
/// - `D`: Platform-specific I/O driver
/// - `A`: HTTP collaborator
/// - `E`: Environment for time and randomness
pub struct Runtime<D, A, E>
where
    D: Driver,
    A: ChatApi,
    E: Environment,
{
    driver: D,
    api: A,
    env: E,
    client: Client<E>,
    poll_interval: Duration,
    pending: FuturesUnordered<BoxFuture<'static, Completion<E::Instant>>>,
    progress_tx: mpsc::UnboundedSender<ProgressReport>,
    progress_rx: mpsc::UnboundedReceiver<ProgressReport>,
    last_tick: E::Instant,
}

impl<D, A, E> Runtime<D, A, E>
where
    D: Driver,
    A: ChatApi,
    E: Environment,
{
    /// Create a runtime with a signed-out client.
    pub fn new(driver: D, api: A, env: E, config: RuntimeConfig) -> Self {
        let client = Client::new(env.clone(), config.client);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let last_tick = env.now();
        Self {
            driver,
            api,
            env,
            client,
            poll_interval: config.poll_interval,
            pending: FuturesUnordered::new(),
            progress_tx,
            progress_rx,
            last_tick,
        }
    }

    /// The client state machine.
    pub fn client(&self) -> &Client<E> {
        &self.client
    }

    /// The driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// HTTP requests still running.
    pub fn requests_in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Sign in and run the event loop until input is exhausted or the user
    /// quits.
    ///
    /// Each cycle waits for the first of: upload progress, a finished HTTP
    /// request, driver input, or the poll interval. Timers are ticked at
    /// least every poll interval regardless of traffic.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver encounters an I/O error. Socket
    /// failures are not errors; the client reconnects.
    pub async fn run(mut self, session: SessionContext) -> Result<(), D::Error> {
        tracing::info!(user = %session.identity.id, "runtime starting");
        let actions = self.feed(ClientEvent::SignIn(session));
        self.execute(actions).await?;

        loop {
            let step = tokio::select! {
                biased;
                Some(report) = self.progress_rx.recv() => Step::Progress(report),
                Some(done) = self.pending.next(), if !self.pending.is_empty() => {
                    Step::Completed(done)
                },
                input = self.driver.next_input() => Step::Input(input),
                () = self.env.sleep(self.poll_interval) => Step::Tick,
            };

            match step {
                Step::Input(input) => match input? {
                    None => break,
                    Some(input) => {
                        if self.on_input(input).await? {
                            break;
                        }
                    },
                },
                Step::Completed(done) => {
                    // Progress written before the request finished comes first.
                    self.drain_progress().await?;
                    self.on_completion(done).await?;
                },
                Step::Progress(report) => self.on_progress(report).await?,
                Step::Tick => {},
            }

            self.tick_if_due().await?;
        }

        tracing::info!("runtime stopping");
        let actions = self.feed(ClientEvent::SignOut);
        self.execute(actions).await?;
        self.driver.stop();
        Ok(())
    }

    /// Returns `true` if the user asked to quit.
    async fn on_input(&mut self, input: Input) -> Result<bool, D::Error> {
        match input {
            Input::Frame(text) => {
                let actions = self.feed(ClientEvent::FrameReceived(text));
                self.execute(actions).await?;
            },
            Input::TransportClosed { reason } => {
                let actions = self.feed(ClientEvent::TransportClosed { reason });
                self.execute(actions).await?;
            },
            Input::Command(command) => match command.into_client_event() {
                Ok(event) => match self.client.handle(event) {
                    Ok(actions) => self.execute(actions).await?,
                    Err(e) => self.driver.report_error(&e.to_string())?,
                },
                Err(Command::Quit) => return Ok(true),
                Err(Command::Download { message_id, index }) => {
                    self.start_download(&message_id, index)?;
                },
                Err(other) => tracing::warn!(command = ?other, "command has no handler"),
            },
        }
        Ok(false)
    }

    async fn on_completion(&mut self, done: Completion<E::Instant>) -> Result<(), D::Error> {
        match done {
            Completion::Client(event) => {
                let actions = self.feed(event);
                self.execute(actions).await
            },
            Completion::Download { target, result } => match result {
                Ok(data) => {
                    let bytes = data.len();
                    tracing::info!(filename = %target.filename, bytes, "download finished");
                    self.driver.save_file(&target, data)
                },
                Err(reason) => self
                    .driver
                    .report_error(&format!("download of {} failed: {reason}", target.filename)),
            },
        }
    }

    async fn on_progress(&mut self, report: ProgressReport) -> Result<(), D::Error> {
        let ProgressReport { batch_id, sent, total } = report;
        let actions = self.feed(ClientEvent::UploadProgress { batch_id, sent, total });
        self.execute(actions).await
    }

    async fn drain_progress(&mut self) -> Result<(), D::Error> {
        while let Ok(report) = self.progress_rx.try_recv() {
            self.on_progress(report).await?;
        }
        Ok(())
    }

    async fn tick_if_due(&mut self) -> Result<(), D::Error> {
        let now = self.env.now();
        if now - self.last_tick < self.poll_interval {
            return Ok(());
        }
        self.last_tick = now;
        let actions = self.feed(ClientEvent::Tick { now });
        self.execute(actions).await
    }

    /// Hand an event to the client. Rejected events are logged and dropped.
    fn feed(&mut self, event: ClientEvent<E::Instant>) -> Vec<ClientAction> {
        match self.client.handle(event) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!(error = %e, "client rejected event");
                Vec::new()
            },
        }
    }

    /// Carry out client actions, including any the results feed back.
    async fn execute(&mut self, actions: Vec<ClientAction>) -> Result<(), D::Error> {
        let mut queue = VecDeque::from(actions);

        while let Some(action) = queue.pop_front() {
            match action {
                ClientAction::OpenTransport { url } => {
                    if let Err(e) = self.driver.open(&url).await {
                        tracing::warn!(%url, error = %e, "socket open failed");
                        let reason = e.to_string();
                        queue.extend(self.feed(ClientEvent::TransportClosed { reason }));
                    }
                },
                ClientAction::CloseTransport { reason } => self.driver.close(&reason),
                ClientAction::SendFrame(frame) => {
                    if let Err(e) = self.driver.send_frame(frame).await {
                        tracing::warn!(error = %e, "socket write failed");
                        let reason = e.to_string();
                        queue.extend(self.feed(ClientEvent::TransportClosed { reason }));
                    }
                },
                ClientAction::LoadHistory { room_id } => self.start_load(room_id),
                ClientAction::Upload { batch_id, files } => self.start_upload(batch_id, files),
                ClientAction::SetFavorite { message_id, favorite } => {
                    self.start_favorite(message_id, favorite);
                },
                ClientAction::Notify(notice) => self.driver.present(&self.client, &notice)?,
            }
        }
        Ok(())
    }

    fn session(&self) -> Option<SessionContext> {
        self.client.connection().session().cloned()
    }

    fn start_load(&mut self, room_id: RoomId) {
        let api = self.api.clone();
        let session = self.session();
        self.pending.push(Box::pin(async move {
            let result = match session {
                Some(session) => {
                    api.load_history(&session, &room_id).await.map_err(|e| e.to_string())
                },
                None => Err(NOT_SIGNED_IN.to_string()),
            };
            Completion::Client(ClientEvent::HistoryLoaded { room_id, result })
        }));
    }

    fn start_upload(&mut self, batch_id: u64, files: Vec<LocalFile>) {
        let api = self.api.clone();
        let session = self.session();
        let sink = ProgressSink::new(batch_id, self.progress_tx.clone());
        self.pending.push(Box::pin(async move {
            let result = match session {
                Some(session) => api.upload(&session, files, sink).await.map_err(|e| e.to_string()),
                None => Err(NOT_SIGNED_IN.to_string()),
            };
            Completion::Client(ClientEvent::UploadCompleted { batch_id, result })
        }));
    }

    fn start_favorite(&mut self, message_id: MessageId, favorite: bool) {
        let api = self.api.clone();
        let session = self.session();
        self.pending.push(Box::pin(async move {
            let result = match session {
                Some(session) => api
                    .set_favorite(&session, &message_id, favorite)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err(NOT_SIGNED_IN.to_string()),
            };
            Completion::Client(ClientEvent::FavoriteCompleted { message_id, favorite, result })
        }));
    }

    fn start_download(&mut self, message_id: &str, index: usize) -> Result<(), D::Error> {
        let attachment = self
            .client
            .find_message(message_id)
            .and_then(|m| m.attachments.get(index))
            .cloned();
        let Some(attachment) = attachment else {
            return self
                .driver
                .report_error(&format!("message {message_id} has no attachment #{index}"));
        };

        let target = download_target(&attachment);
        tracing::debug!(%message_id, filename = %target.filename, "download started");
        let api = self.api.clone();
        let session = self.session();
        self.pending.push(Box::pin(async move {
            let result = match session {
                Some(session) => {
                    api.download(&session, &attachment.url).await.map_err(|e| e.to_string())
                },
                None => Err(NOT_SIGNED_IN.to_string()),
            };
            Completion::Download { target, result }
        }));
        Ok(())
    }
}
