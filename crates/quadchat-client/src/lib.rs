//! Client
//!
//! Action-based chat session state machine. Tracks rooms and focus, folds
//! presence and typing events, keeps one ordered timeline per room, and
//! reconciles optimistic sends with their acknowledgements.
//!
//! # Architecture
//!
//! The client follows the same Sans-IO and action-based patterns as
//! [`quadchat_core`]. It receives events ([`ClientEvent`]), processes them
//! through pure state machine logic, and returns actions ([`ClientAction`])
//! for the caller to execute: frames to write, HTTP calls to make, and
//! [`Notice`]s for the presentation layer.
//!
//! # Components
//!
//! - [`Client`]: Top-level state machine
//! - [`RoomTracker`]: Room list, joined set, focus, placeholder merging
//! - [`PresenceAggregator`]: Online state and per-room typing lists
//! - [`TypingDebouncer`]: Local typing start/stop signals
//! - [`Timeline`]: Per-room messages with optimistic reconciliation
//! - [`ProgressTracker`]: Aggregate upload progress
//! - [`download_target`]: Filename and content type for saving attachments
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedTransport`]: WebSocket frame channels
//! - [`transport::connect`]: Open the Engine.IO WebSocket

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod attachment;
mod client;
mod error;
mod event;
pub mod presence;
pub mod rooms;
pub mod timeline;
pub mod typing;
pub mod upload;

#[cfg(feature = "transport")]
pub mod transport;

pub use attachment::{DownloadTarget, OCTET_STREAM, download_target};
pub use client::{Client, ClientConfig, DEFAULT_ACK_TIMEOUT};
pub use error::{ChatFailure, ClientError};
pub use event::{ClientAction, ClientEvent, Notice};
pub use presence::{PresenceAggregator, TypingSummary, UserPresence};
pub use quadchat_core::{Environment, SessionContext};
pub use rooms::{RoomTracker, UpsertOutcome};
pub use timeline::{AppendOutcome, LoadState, Timeline};
pub use typing::{TypingDebouncer, TypingSignal};
pub use upload::{LocalFile, ProgressTracker, UploadBatch};
