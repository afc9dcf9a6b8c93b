//! Terminal driver: stdin lines in, text lines out, a real WebSocket.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use quadchat_app::{Command, Driver, Input};
use quadchat_client::{
    Client, DownloadTarget, Environment, LocalFile, Notice,
    transport::{self, ConnectedTransport, TransportError, TransportEvent},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    task::JoinHandle,
};
use url::Url;

use crate::{
    commands::{self, HELP, Line},
    render::Presenter,
};

/// Terminal driver errors.
#[derive(Debug, Error)]
pub enum TerminalError {
    /// Terminal or file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// WebSocket could not be opened.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Frame written with no socket open.
    #[error("socket not open")]
    NotOpen,
}

/// Driver for an interactive terminal session.
pub struct TerminalDriver {
    lines: Lines<BufReader<Stdin>>,
    out: io::Stdout,
    transport: Option<ConnectedTransport>,
    /// `/attach` whose files are still being read.
    attaching: Option<JoinHandle<io::Result<Command>>>,
    presenter: Presenter,
    download_dir: PathBuf,
}

impl TerminalDriver {
    /// Driver reading commands from stdin and saving downloads into
    /// `download_dir`.
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            out: io::stdout(),
            transport: None,
            attaching: None,
            presenter: Presenter::new(),
            download_dir,
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), TerminalError> {
        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }

    /// Turn a typed line into input, or `None` if it was handled here.
    /// Sync, so a line is never half-handled when the runtime drops
    /// `next_input`. File reads for `/attach` run on their own task and
    /// come back through `next_input`.
    fn on_line(&mut self, line: &str) -> Result<Option<Input>, TerminalError> {
        match commands::parse_line(line) {
            Ok(Line::Empty) => Ok(None),
            Ok(Line::Help) => {
                self.write_line(HELP)?;
                Ok(None)
            },
            Ok(Line::Command(command)) => Ok(Some(Input::Command(command))),
            Ok(Line::Attach { paths, caption }) => {
                if self.attaching.is_some() {
                    self.write_line("! still reading the previous attachments")?;
                    return Ok(None);
                }
                self.attaching = Some(tokio::spawn(async move {
                    let files = read_files(&paths).await?;
                    Ok(Command::Send { content: caption, files, reply_to: None })
                }));
                Ok(None)
            },
            Err(e) => {
                self.write_line(&format!("! {e}"))?;
                Ok(None)
            },
        }
    }
}

/// Next event from the socket, or never while none is open.
async fn next_event(transport: &mut Option<ConnectedTransport>) -> TransportEvent {
    match transport {
        Some(transport) => transport
            .from_server
            .recv()
            .await
            .unwrap_or_else(|| TransportEvent::Closed { reason: "socket task ended".into() }),
        None => std::future::pending().await,
    }
}

/// Result of the pending `/attach` read, or never while none is running.
async fn attached(
    attaching: &mut Option<JoinHandle<io::Result<Command>>>,
) -> io::Result<Command> {
    match attaching {
        Some(task) => task.await.unwrap_or_else(|e| Err(io::Error::other(e))),
        None => std::future::pending().await,
    }
}

/// Read attachments, typing each by its extension.
async fn read_files(paths: &[PathBuf]) -> io::Result<Vec<LocalFile>> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let mime_type = mime_guess::from_path(path).first_raw().map(str::to_string);
        files.push(LocalFile::new(filename, mime_type, Bytes::from(data)));
    }
    Ok(files)
}

/// A path inside `dir` that does not exist yet: `name`, then `name (1)`...
fn free_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{ext}")),
        _ => (filename, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

impl Driver for TerminalDriver {
    type Error = TerminalError;

    async fn next_input(&mut self) -> Result<Option<Input>, TerminalError> {
        loop {
            tokio::select! {
                line = self.lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(input) = self.on_line(&line)? {
                            return Ok(Some(input));
                        }
                    },
                    None => return Ok(None),
                },
                event = next_event(&mut self.transport) => match event {
                    TransportEvent::Frame(frame) => return Ok(Some(Input::Frame(frame))),
                    TransportEvent::Closed { reason } => {
                        self.transport = None;
                        return Ok(Some(Input::TransportClosed { reason }));
                    },
                },
                read = attached(&mut self.attaching) => {
                    self.attaching = None;
                    match read {
                        Ok(command) => return Ok(Some(Input::Command(command))),
                        Err(e) => self.write_line(&format!("! {e}"))?,
                    }
                },
            }
        }
    }

    async fn open(&mut self, url: &Url) -> Result<(), TerminalError> {
        if let Some(stale) = self.transport.take() {
            stale.stop();
        }
        tracing::debug!(%url, "opening websocket");
        self.transport = Some(transport::connect(url).await?);
        Ok(())
    }

    async fn send_frame(&mut self, frame: String) -> Result<(), TerminalError> {
        let transport = self.transport.as_ref().ok_or(TerminalError::NotOpen)?;
        transport.to_server.send(frame).await.map_err(|_| TerminalError::NotOpen)
    }

    fn close(&mut self, reason: &str) {
        if let Some(transport) = self.transport.take() {
            tracing::debug!(reason, "closing websocket");
            transport.stop();
        }
    }

    fn present<E: Environment>(
        &mut self,
        client: &Client<E>,
        notice: &Notice,
    ) -> Result<(), TerminalError> {
        for line in self.presenter.lines(client, notice) {
            self.write_line(&line)?;
        }
        Ok(())
    }

    fn report_error(&mut self, message: &str) -> Result<(), TerminalError> {
        self.write_line(&format!("! {message}"))
    }

    fn save_file(&mut self, target: &DownloadTarget, data: Bytes) -> Result<(), TerminalError> {
        let path = free_path(&self.download_dir, &target.filename);
        std::fs::write(&path, &data)?;
        tracing::info!(path = %path.display(), bytes = data.len(), "attachment saved");
        self.write_line(&format!("* saved {} ({} bytes)", path.display(), data.len()))
    }

    fn stop(&mut self) {
        if let Some(task) = self.attaching.take() {
            task.abort();
        }
        self.close("driver stopped");
    }
}
