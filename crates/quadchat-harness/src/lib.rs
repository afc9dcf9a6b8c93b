//! Deterministic simulation harness for quadchat session testing.
//!
//! Virtual-clock implementations of the Environment and HTTP traits, an
//! in-memory `/chat` server, and a simulation Driver, for deterministic,
//! reproducible testing of reconnects, delivery races and upload progress.
//!
//! # Worlds
//!
//! - [`TestCluster`]: synchronous world of several clients around one
//!   server. Tests choose exactly when frames and HTTP responses move.
//! - [`SimDriver`] + [`SimApi`]: the real [`quadchat_app::Runtime`] loop
//!   over the same server, with virtual time.
//!
//! # Invariant Testing
//!
//! [`InvariantRegistry::standard()`] is checked after every event a world
//! processes; [`InvariantRegistry::quiescent()`] once it has settled.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cluster;
pub mod invariants;
pub mod sim_api;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_server;

pub use cluster::{ClusterError, SIM_SERVER_URL, SimClient, TestCluster};
pub use invariants::{
    ClientSnapshot, Invariant, InvariantKind, InvariantRegistry, MessageSnapshot, RoomSnapshot,
    SystemSnapshot, Violation,
};
pub use sim_api::{SimApi, SimApiError};
pub use sim_driver::{SimDriver, SimDriverError, SimObserver, SimStep};
pub use sim_env::{SIM_EPOCH_MILLIS, SimEnv, SimInstant};
pub use sim_server::{
    ConnId, ServerFaults, SharedSimServer, SimServer, SimServerError, create_shared_server,
};
