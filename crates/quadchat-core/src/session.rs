//! Session context: who is signed in, and where the chat server lives.
//!
//! The same base URL serves the WebSocket endpoint and the HTTP API.

use quadchat_proto::Identity;
use url::Url;

use crate::error::ConnectionError;

/// Path of the Socket.IO endpoint on the chat server.
pub const SOCKET_PATH: &str = "/socket.io/";

/// Signed-in identity plus server location.
///
/// Two contexts compare equal only when the identity, token and server all
/// match; the connection manager reconnects on any difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Current user.
    pub identity: Identity,
    /// Base HTTP(S) URL of the chat server.
    pub server_url: Url,
}

impl SessionContext {
    /// Create a context for `identity` against `server_url`.
    pub fn new(identity: Identity, server_url: Url) -> Self {
        Self { identity, server_url }
    }

    /// WebSocket URL for the Engine.IO v4 transport.
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidUrl` if the base URL cannot carry a
    /// WebSocket scheme (e.g. `mailto:`).
    pub fn socket_url(&self) -> Result<Url, ConnectionError> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| ConnectionError::InvalidUrl(self.server_url.to_string()))?;
        url.set_path(SOCKET_PATH);
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    /// HTTP API URL for `path` (relative to the server root).
    ///
    /// # Errors
    ///
    /// `ConnectionError::InvalidUrl` if `path` does not form a valid URL.
    pub fn api_url(&self, path: &str) -> Result<Url, ConnectionError> {
        self.server_url
            .join(path)
            .map_err(|e| ConnectionError::InvalidUrl(format!("{path}: {e}")))
    }
}
