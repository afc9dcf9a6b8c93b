//! HTTP collaborator contract.
//!
//! The chat server's request/response side: room history, attachment
//! uploads, favorites and attachment downloads. The runtime calls it for the
//! matching [`quadchat_client::ClientAction`]s and feeds results back into
//! the client as events.

use std::future::Future;

use bytes::Bytes;
use quadchat_client::LocalFile;
use quadchat_core::SessionContext;
use quadchat_proto::{Attachment, Message};
use tokio::sync::mpsc;

/// Cumulative bytes written for one upload batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    /// Batch the bytes belong to.
    pub batch_id: u64,
    /// Bytes written so far across all files.
    pub sent: u64,
    /// Total bytes in the request.
    pub total: u64,
}

/// Where an upload reports its progress.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    batch_id: u64,
    tx: mpsc::UnboundedSender<ProgressReport>,
}

impl ProgressSink {
    /// Sink reporting for `batch_id` into `tx`.
    pub fn new(batch_id: u64, tx: mpsc::UnboundedSender<ProgressReport>) -> Self {
        Self { batch_id, tx }
    }

    /// Batch this sink reports for.
    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    /// Report cumulative bytes written. Dropped once the runtime is gone.
    pub fn report(&self, sent: u64, total: u64) {
        let _ = self.tx.send(ProgressReport { batch_id: self.batch_id, sent, total });
    }
}

/// The chat server's HTTP API.
///
/// Every call carries the session so the implementation can resolve paths
/// against the server URL and authenticate with the bearer token.
///
/// # Implementations
///
/// - **Production**: [`crate::http::HttpApi`] (reqwest, `http` feature)
/// - **Simulation**: the harness API backed by the in-memory server
pub trait ChatApi: Clone + Send + Sync + 'static {
    /// Implementation error. Only its text reaches the client.
    type Error: std::error::Error + Send + 'static;

    /// `GET /api/rooms/{room_id}/messages`: the room's history in server
    /// order.
    fn load_history(
        &self,
        session: &SessionContext,
        room_id: &str,
    ) -> impl Future<Output = Result<Vec<Message>, Self::Error>> + Send;

    /// `POST /api/upload`: every file in one multipart request (field
    /// `files`), reporting aggregate progress to `progress`.
    ///
    /// # Errors
    ///
    /// Any transport failure or non-2xx response. No attachments are
    /// returned from a failed batch.
    fn upload(
        &self,
        session: &SessionContext,
        files: Vec<LocalFile>,
        progress: ProgressSink,
    ) -> impl Future<Output = Result<Vec<Attachment>, Self::Error>> + Send;

    /// `POST /api/messages/{id}/favorite` or `/unfavorite`.
    fn set_favorite(
        &self,
        session: &SessionContext,
        message_id: &str,
        favorite: bool,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Fetch an attachment's bytes. `url` may be relative to the server.
    fn download(
        &self,
        session: &SessionContext,
        url: &str,
    ) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;
}
