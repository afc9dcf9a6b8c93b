//! WebSocket transport for the client.
//!
//! Provides [`ConnectedTransport`], which moves Engine.IO text frames between
//! a WebSocket and a pair of channels. Protocol logic stays in the Sans-IO
//! [`crate::Client`]; this layer only reads and writes text.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use url::Url;

/// Frames buffered in each direction.
const CHANNEL_CAPACITY: usize = 64;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket handshake failed.
    #[error("connection failed: {0}")]
    Connection(String),
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Frame(String),
    /// The socket closed or errored. No more events follow.
    Closed {
        /// Close frame reason or error text.
        reason: String,
    },
}

/// Handle to an open WebSocket.
///
/// Frames are sent and received via the channels; an internal task does the
/// socket I/O. Dropping `to_server` closes the socket.
pub struct ConnectedTransport {
    /// Send text frames to the server.
    pub to_server: mpsc::Sender<String>,
    /// Frames and the final close from the server.
    pub from_server: mpsc::Receiver<TransportEvent>,
    abort_handle: tokio::task::AbortHandle,
}

impl ConnectedTransport {
    /// Stop the socket task without a close handshake.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

impl Drop for ConnectedTransport {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Open a WebSocket to `url` (the Engine.IO endpoint from
/// `ClientAction::OpenTransport`).
///
/// # Errors
///
/// `TransportError::Connection` if the WebSocket handshake fails.
pub async fn connect(url: &Url) -> Result<ConnectedTransport, TransportError> {
    let (stream, _response) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Connection(format!("{url}: {e}")))?;
    tracing::debug!(%url, "websocket open");

    let (to_server_tx, to_server_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (from_server_tx, from_server_rx) = mpsc::channel::<TransportEvent>(CHANNEL_CAPACITY);

    let handle = tokio::spawn(run_connection(stream, to_server_rx, from_server_tx));

    Ok(ConnectedTransport {
        to_server: to_server_tx,
        from_server: from_server_rx,
        abort_handle: handle.abort_handle(),
    })
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Bridge the socket and the channels until either side closes.
async fn run_connection(
    stream: WsStream,
    mut to_server: mpsc::Receiver<String>,
    from_server: mpsc::Sender<TransportEvent>,
) {
    let (mut write, mut read) = stream.split();

    let reason = loop {
        tokio::select! {
            outgoing = to_server.recv() => {
                let Some(text) = outgoing else {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break "closed by client".to_string();
                };
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    break format!("write failed: {e}");
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if from_server.send(TransportEvent::Frame(text)).await.is_err() {
                        break "receiver dropped".to_string();
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server: {}", f.reason),
                    );
                },
                // Engine.IO heartbeats are text packets; binary frames are
                // never negotiated and websocket pings are answered by
                // tungstenite.
                Some(Ok(_)) => {},
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "stream ended".to_string(),
            },
        }
    };

    tracing::debug!(%reason, "websocket closed");
    let _ = from_server.send(TransportEvent::Closed { reason }).await;
}
