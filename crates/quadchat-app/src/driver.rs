//! Driver trait for abstracting I/O operations.
//!
//! The [`Driver`] trait decouples the runtime from specific I/O
//! implementations. Each frontend implements the trait to provide
//! platform-specific input, socket and output handling, while the generic
//! [`crate::Runtime`] handles all orchestration.

use std::future::Future;

use bytes::Bytes;
use quadchat_client::{Client, DownloadTarget, Notice};
use quadchat_core::Environment;
use url::Url;

use crate::Command;

/// Something the driver observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// The user asked for something.
    Command(Command),
    /// A text frame arrived on the socket.
    Frame(String),
    /// The socket closed or failed.
    TransportClosed {
        /// What the socket reported.
        reason: String,
    },
}

/// Abstracts I/O operations for the runtime.
///
/// Implementations provide platform-specific I/O while the generic
/// [`Runtime`](crate::Runtime) handles orchestration logic. This ensures
/// the same orchestration code runs in the terminal client and in
/// simulation.
///
/// # Implementations
///
/// - **CLI**: stdin lines for commands, tokio-tungstenite for the socket
/// - **Simulation**: scripted commands against an in-memory server
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Wait for the next input.
    ///
    /// Returns `None` once input is exhausted, which stops the runtime.
    /// Must be cancel safe: the runtime races it against timers and HTTP
    /// completions.
    fn next_input(&mut self) -> impl Future<Output = Result<Option<Input>, Self::Error>> + Send;

    /// Open the socket to `url`. Frames then arrive through
    /// [`Driver::next_input`].
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be opened. The runtime treats
    /// this as a dropped transport and lets the client back off.
    fn open(&mut self, url: &Url) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Write a text frame to the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket is gone.
    fn send_frame(&mut self, frame: String) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the socket. No-op if none is open.
    fn close(&mut self, reason: &str);

    /// Show a state change. `client` is the state after the change.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    fn present<E: Environment>(
        &mut self,
        client: &Client<E>,
        notice: &Notice,
    ) -> Result<(), Self::Error>;

    /// Tell the user a command could not be carried out.
    ///
    /// # Errors
    ///
    /// Returns an error if output fails.
    fn report_error(&mut self, message: &str) -> Result<(), Self::Error>;

    /// Store a downloaded attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    fn save_file(&mut self, target: &DownloadTarget, data: Bytes) -> Result<(), Self::Error>;

    /// Release resources before the runtime returns.
    fn stop(&mut self);
}
