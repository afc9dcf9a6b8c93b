//! [`ChatApi`] backed by the in-memory server.

use std::sync::PoisonError;

use bytes::Bytes;
use quadchat_app::{ChatApi, ProgressSink};
use quadchat_client::LocalFile;
use quadchat_core::SessionContext;
use quadchat_proto::{Attachment, Message};
use thiserror::Error;

use crate::sim_server::SharedSimServer;

/// Error returned by the simulated HTTP side. Carries the server's text.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SimApiError(pub String);

/// HTTP collaborator answering from a [`SharedSimServer`].
///
/// Calls complete on first poll. Uploads report half the bytes, then all of
/// them, before the server sees the files.
#[derive(Debug, Clone)]
pub struct SimApi {
    server: SharedSimServer,
}

impl SimApi {
    /// API in front of `server`.
    pub fn new(server: SharedSimServer) -> Self {
        Self { server }
    }
}

impl ChatApi for SimApi {
    type Error = SimApiError;

    async fn load_history(
        &self,
        session: &SessionContext,
        room_id: &str,
    ) -> Result<Vec<Message>, SimApiError> {
        let server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        server.history(session.identity.auth_token.expose(), room_id).map_err(SimApiError)
    }

    async fn upload(
        &self,
        session: &SessionContext,
        files: Vec<LocalFile>,
        progress: ProgressSink,
    ) -> Result<Vec<Attachment>, SimApiError> {
        let total: u64 = files.iter().map(LocalFile::len).sum();
        progress.report(total / 2, total);
        progress.report(total, total);

        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        server.upload(session.identity.auth_token.expose(), &files).map_err(SimApiError)
    }

    async fn set_favorite(
        &self,
        session: &SessionContext,
        message_id: &str,
        favorite: bool,
    ) -> Result<(), SimApiError> {
        let mut server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        server
            .set_favorite(session.identity.auth_token.expose(), message_id, favorite)
            .map_err(SimApiError)
    }

    async fn download(&self, session: &SessionContext, url: &str) -> Result<Bytes, SimApiError> {
        let server = self.server.lock().unwrap_or_else(PoisonError::into_inner);
        server.download(session.identity.auth_token.expose(), url).map_err(SimApiError)
    }
}
