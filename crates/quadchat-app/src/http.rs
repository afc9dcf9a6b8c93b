//! reqwest implementation of [`ChatApi`].
//!
//! Uploads stream each file in fixed-size chunks so progress can be
//! reported as reqwest pulls the body, rather than only at the end.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use bytes::Bytes;
use futures::StreamExt;
use quadchat_client::LocalFile;
use quadchat_core::SessionContext;
use quadchat_proto::{Attachment, Message};
use reqwest::{
    Body,
    multipart::{Form, Part},
};
use thiserror::Error;
use url::Url;

use crate::{ChatApi, ProgressSink};

/// Bytes handed to reqwest per body chunk.
const UPLOAD_CHUNK: usize = 64 * 1024;

/// Multipart field carrying the files.
const UPLOAD_FIELD: &str = "files";

/// HTTP API errors.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Endpoint could not be built from the server URL.
    #[error("invalid url: {0}")]
    Url(String),

    /// Request failed or returned a non-success status.
    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Chat server API over HTTPS.
#[derive(Debug, Clone, Default)]
pub struct HttpApi {
    http: reqwest::Client,
}

impl HttpApi {
    /// API with a default reqwest client.
    pub fn new() -> Self {
        Self::default()
    }

    /// API sharing an existing reqwest client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl ChatApi for HttpApi {
    type Error = HttpError;

    async fn load_history(
        &self,
        session: &SessionContext,
        room_id: &str,
    ) -> Result<Vec<Message>, HttpError> {
        let url = endpoint(session, &["api", "rooms", room_id, "messages"])?;
        let messages = self
            .http
            .get(url)
            .bearer_auth(session.identity.auth_token.expose())
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Message>>()
            .await?;
        tracing::debug!(room_id, count = messages.len(), "history fetched");
        Ok(messages)
    }

    async fn upload(
        &self,
        session: &SessionContext,
        files: Vec<LocalFile>,
        progress: ProgressSink,
    ) -> Result<Vec<Attachment>, HttpError> {
        let url = endpoint(session, &["api", "upload"])?;
        let total: u64 = files.iter().map(LocalFile::len).sum();
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = Form::new();
        for file in files {
            form = form.part(UPLOAD_FIELD, file_part(file, total, &sent, &progress)?);
        }

        let attachments = self
            .http
            .post(url)
            .bearer_auth(session.identity.auth_token.expose())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Attachment>>()
            .await?;
        let batch_id = progress.batch_id();
        tracing::debug!(batch_id, count = attachments.len(), "upload accepted");
        Ok(attachments)
    }

    async fn set_favorite(
        &self,
        session: &SessionContext,
        message_id: &str,
        favorite: bool,
    ) -> Result<(), HttpError> {
        let action = if favorite { "favorite" } else { "unfavorite" };
        let url = endpoint(session, &["api", "messages", message_id, action])?;
        self.http
            .post(url)
            .bearer_auth(session.identity.auth_token.expose())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn download(&self, session: &SessionContext, url: &str) -> Result<Bytes, HttpError> {
        let url = session.api_url(url).map_err(|e| HttpError::Url(e.to_string()))?;
        let data = self
            .http
            .get(url)
            .bearer_auth(session.identity.auth_token.expose())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(data)
    }
}

/// Server URL with `segments` appended, each percent-encoded.
fn endpoint(session: &SessionContext, segments: &[&str]) -> Result<Url, HttpError> {
    let mut url = session.server_url.clone();
    url.path_segments_mut()
        .map_err(|()| HttpError::Url(session.server_url.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Split `data` into body chunks.
fn chunks(data: &Bytes) -> Vec<Bytes> {
    (0..data.len())
        .step_by(UPLOAD_CHUNK)
        .map(|start| data.slice(start..data.len().min(start + UPLOAD_CHUNK)))
        .collect()
}

/// One multipart part whose body reports cumulative batch progress as it is
/// read.
fn file_part(
    file: LocalFile,
    total: u64,
    sent: &Arc<AtomicU64>,
    progress: &ProgressSink,
) -> Result<Part, HttpError> {
    let LocalFile { filename, mime_type, data } = file;
    let length = data.len() as u64;
    let sent = Arc::clone(sent);
    let progress = progress.clone();

    let stream = futures::stream::iter(chunks(&data)).map(move |chunk| {
        let so_far = sent.fetch_add(chunk.len() as u64, Ordering::Relaxed) + chunk.len() as u64;
        progress.report(so_far, total);
        Ok::<Bytes, std::io::Error>(chunk)
    });

    let part = Part::stream_with_length(Body::wrap_stream(stream), length).file_name(filename);
    match mime_type {
        Some(mime) => part.mime_str(&mime).map_err(HttpError::Request),
        None => Ok(part),
    }
}
