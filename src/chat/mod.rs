//! Interactive chat front end.
//!
//! A streaming REPL built on [`SessionController`](crate::SessionController) and
//! [`HistoryController`](crate::HistoryController):
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: the session glue that streams replies and runs commands
//! - [`commands`]: slash command parsing
//! - [`render`]: terminal output

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, PASSWORD_VAR};
pub use render::{PlainTextRenderer, Renderer, format_timestamp};
pub use session::{ChatSession, CommandOutcome};
