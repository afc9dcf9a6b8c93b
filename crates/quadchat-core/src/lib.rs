//! Core session logic for the quadchat client.
//!
//! Holds the pieces every other crate builds on: the [`Environment`]
//! abstraction for time and randomness, the [`Connection`] manager state
//! machine, and the [`SessionContext`] describing who is signed in where.
//!
//! Everything here is sans-IO. Drivers execute the returned actions.

pub mod connection;
pub mod env;
pub mod error;
pub mod session;

pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_NAMESPACE, DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_CAP,
};
pub use env::Environment;
pub use error::ConnectionError;
pub use session::SessionContext;
