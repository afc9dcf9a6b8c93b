//! Application layer for quadchat
//!
//! Generic runtime around the Sans-IO [`quadchat_client::Client`], so the
//! same orchestration runs in the terminal client and in deterministic
//! simulation.
//!
//! # Components
//!
//! - [`Driver`]: Trait for platform-specific I/O (input, socket, output)
//! - [`ChatApi`]: Trait for the HTTP collaborator (history, uploads,
//!   favorites, downloads)
//! - [`Command`]: User intents fed to the runtime
//! - [`Runtime`]: Event loop that executes client actions through the
//!   driver and the API and feeds the results back
//! - [`SystemEnv`]: Production [`quadchat_core::Environment`]
//!
//! # HTTP (optional)
//!
//! With the `http` feature enabled, [`http::HttpApi`] implements [`ChatApi`]
//! with reqwest.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod api;
mod command;
mod driver;
mod runtime;
mod system_env;

#[cfg(feature = "http")]
pub mod http;

pub use api::{ChatApi, ProgressReport, ProgressSink};
pub use command::Command;
pub use driver::{Driver, Input};
pub use runtime::{DEFAULT_POLL_INTERVAL, Runtime, RuntimeConfig};
pub use system_env::SystemEnv;
