//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the REPL without sending messages to the
//! backend.

use crate::types::ChatId;

/// A parsed chat command.
///
/// These commands control the REPL and are never sent as messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Create a chat and switch to it.
    New,

    /// List the backend's chats.
    Chats,

    /// Switch to another chat.
    Open(ChatId),

    /// Delete a chat.
    Delete(ChatId),

    /// Rename the open chat.
    Rename(String),

    /// List the available models.
    Models,

    /// Select a model. An empty name clears the selection.
    Model(String),

    /// Send the pending message again after a failed send.
    Retry,

    /// Stop the generation in progress.
    Stop,

    /// Show the open chat, the selected model and the generation state.
    Status,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a message.
///
/// # Examples
///
/// ```
/// # use lmchat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model llama3").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        "new" => ChatCommand::New,
        "chats" | "list" => ChatCommand::Chats,
        "open" => match argument {
            Some(id) => ChatCommand::Open(ChatId::from(id)),
            None => ChatCommand::Invalid("/open requires a chat id".to_string()),
        },
        "delete" => match argument {
            Some(id) => ChatCommand::Delete(ChatId::from(id)),
            None => ChatCommand::Invalid("/delete requires a chat id".to_string()),
        },
        "rename" | "title" => match argument {
            Some(title) => ChatCommand::Rename(title.to_string()),
            None => ChatCommand::Invalid("/rename requires a title".to_string()),
        },
        "models" => ChatCommand::Models,
        "model" => match argument {
            Some(arg) if arg.eq_ignore_ascii_case("clear") => ChatCommand::Model(String::new()),
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid(
                "/model requires a model name (or 'clear')".to_string(),
            ),
        },
        "retry" => ChatCommand::Retry,
        "stop" => ChatCommand::Stop,
        "status" | "stats" => ChatCommand::Status,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new chat
  /chats                 List chats
  /open <id>             Switch to another chat
  /delete <id>           Delete a chat
  /rename <title>        Rename the current chat
  /models                List available models
  /model <name>          Select a model (or 'clear')
  /retry                 Resend a message that failed to send
  /stop                  Stop the reply in progress
  /status                Show chat, model and generation state
  /help                  Show this help message
  /quit                  Exit the chat

Sending a message while a reply is streaming stops the reply instead.
Ctrl-C also stops the reply in progress."#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quit_commands() {
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("/q"), Some(ChatCommand::Quit));
        assert_eq!(parse_command("  /quit  "), Some(ChatCommand::Quit));
    }

    #[test]
    fn parse_chat_commands() {
        assert_eq!(parse_command("/new"), Some(ChatCommand::New));
        assert_eq!(parse_command("/CHATS"), Some(ChatCommand::Chats));
        assert_eq!(
            parse_command("/open 42"),
            Some(ChatCommand::Open(ChatId::from("42")))
        );
        assert_eq!(
            parse_command("/delete  7 "),
            Some(ChatCommand::Delete(ChatId::from("7")))
        );
        assert_eq!(
            parse_command("/rename Trip to Lisbon"),
            Some(ChatCommand::Rename("Trip to Lisbon".to_string()))
        );
        assert!(matches!(
            parse_command("/open"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("requires")
        ));
        assert!(matches!(
            parse_command("/rename   "),
            Some(ChatCommand::Invalid(msg)) if msg.contains("title")
        ));
    }

    #[test]
    fn parse_model() {
        assert_eq!(
            parse_command("/model llama3:8b"),
            Some(ChatCommand::Model("llama3:8b".to_string()))
        );
        assert_eq!(
            parse_command("/model   qwen  "),
            Some(ChatCommand::Model("qwen".to_string()))
        );
        assert_eq!(
            parse_command("/model clear"),
            Some(ChatCommand::Model(String::new()))
        );
        assert!(matches!(
            parse_command("/model"),
            Some(ChatCommand::Invalid(_))
        ));
        assert_eq!(parse_command("/models"), Some(ChatCommand::Models));
    }

    #[test]
    fn parse_generation_commands() {
        assert_eq!(parse_command("/retry"), Some(ChatCommand::Retry));
        assert_eq!(parse_command("/stop"), Some(ChatCommand::Stop));
        assert_eq!(parse_command("/status"), Some(ChatCommand::Status));
        assert_eq!(parse_command("/stats"), Some(ChatCommand::Status));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(
            parse_command("/frobnicate"),
            Some(ChatCommand::Invalid("Unknown command: /frobnicate".to_string()))
        );
    }

    #[test]
    fn non_commands() {
        assert_eq!(parse_command("Hello there!"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("a/b"), None);
    }

    #[test]
    fn help_text_not_empty() {
        let help = help_text();
        assert!(help.contains("/quit"));
        assert!(help.contains("/new"));
        assert!(help.contains("/model"));
        assert!(help.contains("/retry"));
    }
}
