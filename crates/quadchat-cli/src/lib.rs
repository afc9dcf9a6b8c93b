//! Terminal client for the campus chat session core.
//!
//! Reads commands from stdin, prints what changes, and wires the real
//! WebSocket transport and HTTP API into [`quadchat_app::Runtime`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod commands;
pub mod render;
pub mod terminal;

pub use commands::{HELP, Line, ParseError, parse_line};
pub use render::Presenter;
pub use terminal::{TerminalDriver, TerminalError};
