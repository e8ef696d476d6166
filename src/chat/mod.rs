//! REPL plumbing for the `lmchat` binary.
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`commands`]: Slash command parsing

mod commands;
mod config;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, DEFAULT_LOG_LEVEL};
