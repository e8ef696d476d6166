//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling the REPL.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::{BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

/// Default log filter when neither `--log-level` nor `LMCHAT_LOG` is given.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// File name of the state file inside the state directory.
const STATE_FILE_NAME: &str = "state.json";

/// Directory under the home directory holding the state file.
const STATE_DIR_NAME: &str = ".lmchat";

/// Command-line arguments for the lmchat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Root URL of the chat backend.
    #[arrrg(optional, "Backend URL (default: http://127.0.0.1:5000/)", "URL")]
    pub base_url: Option<String>,

    /// Chat to open on start.
    #[arrrg(optional, "Chat id to open (default: most recent)", "ID")]
    pub chat: Option<String>,

    /// Model to select on start; persisted like `/model`.
    #[arrrg(optional, "Model to select (persisted)", "MODEL")]
    pub model: Option<String>,

    /// Where the selected model is remembered.
    #[arrrg(optional, "State file (default: ~/.lmchat/state.json)", "PATH")]
    pub state_file: Option<String>,

    /// Timeout for plain requests.
    #[arrrg(optional, "Request timeout in seconds; 0 keeps the default (default: 60)", "SECS")]
    pub timeout_secs: Option<u32>,

    /// Fail a reply stream that stays silent this long.
    #[arrrg(optional, "Stream idle timeout in seconds; 0 disables it (default: none)", "SECS")]
    pub idle_timeout_secs: Option<u32>,

    /// Session cookie forwarded to the backend.
    #[arrrg(optional, "Cookie header sent with every request", "COOKIE")]
    pub cookie: Option<String>,

    /// Log filter.
    #[arrrg(optional, "Log level or filter (default: warn)", "LEVEL")]
    pub log_level: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for the chat REPL.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Root URL of the chat backend.
    pub base_url: String,

    /// Chat to open on start.
    pub chat: Option<String>,

    /// Model to select on start.
    pub model: Option<String>,

    /// Where the selected model is remembered.
    pub state_file: PathBuf,

    /// Timeout for plain requests. Streams are not bound by it.
    pub timeout: Duration,

    /// Stream idle timeout. `None` waits forever.
    pub idle_timeout: Option<Duration>,

    /// Cookie header sent with every request.
    pub cookie: Option<String>,

    /// Log level or `EnvFilter` directive.
    pub log_level: String,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Base URL: `LMCHAT_BASE_URL`, else http://127.0.0.1:5000/
    /// - Request timeout: 60 seconds
    /// - Idle timeout: none
    /// - State file: ~/.lmchat/state.json
    /// - Log level: warn
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            base_url: std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            chat: None,
            model: None,
            state_file: default_state_file(),
            timeout: DEFAULT_TIMEOUT,
            idle_timeout: None,
            cookie: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            use_color: true,
        }
    }

    /// Sets the backend URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the chat to open on start.
    pub fn with_chat(mut self, chat: Option<String>) -> Self {
        self.chat = chat;
        self
    }

    /// Sets the model to select on start.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Sets the state file.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = path;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the stream idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the cookie header.
    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie;
        self
    }

    /// Sets the log filter.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            base_url: args.base_url.unwrap_or(defaults.base_url),
            chat: args.chat.filter(|chat| !chat.trim().is_empty()),
            model: args.model,
            state_file: args
                .state_file
                .map(PathBuf::from)
                .unwrap_or(defaults.state_file),
            timeout: args
                .timeout_secs
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs.into()))
                .unwrap_or(defaults.timeout),
            idle_timeout: args
                .idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(|secs| Duration::from_secs(secs.into())),
            cookie: args.cookie,
            log_level: args.log_level.unwrap_or(defaults.log_level),
            use_color: !args.no_color,
        }
    }
}

fn default_state_file() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(STATE_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(STATE_DIR_NAME))
        .join(STATE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.idle_timeout.is_none());
        assert!(config.use_color);
        assert!(config.chat.is_none());
        assert!(config.model.is_none());
        assert!(config.cookie.is_none());
        assert_eq!(config.log_level, "warn");
        assert!(config.state_file.ends_with(".lmchat/state.json"));
    }

    #[test]
    fn config_from_args_defaults() {
        let config = ChatConfig::from(ChatArgs::default());
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.idle_timeout.is_none());
        assert!(config.use_color);
        assert_eq!(config.state_file, default_state_file());
    }

    #[test]
    fn config_from_args_custom() {
        let args = ChatArgs {
            base_url: Some("http://chat.example:8080/app/".to_string()),
            chat: Some("12".to_string()),
            model: Some("llama3".to_string()),
            state_file: Some("/tmp/lmchat.json".to_string()),
            timeout_secs: Some(5),
            idle_timeout_secs: Some(30),
            cookie: Some("session=abc".to_string()),
            log_level: Some("lmchat=debug".to_string()),
            no_color: true,
        };
        let config = ChatConfig::from(args);
        assert_eq!(config.base_url, "http://chat.example:8080/app/");
        assert_eq!(config.chat.as_deref(), Some("12"));
        assert_eq!(config.model.as_deref(), Some("llama3"));
        assert_eq!(config.state_file, PathBuf::from("/tmp/lmchat.json"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.cookie.as_deref(), Some("session=abc"));
        assert_eq!(config.log_level, "lmchat=debug");
        assert!(!config.use_color);
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let args = ChatArgs {
            idle_timeout_secs: Some(0),
            chat: Some("  ".to_string()),
            ..ChatArgs::default()
        };
        let config = ChatConfig::from(args);
        assert!(config.idle_timeout.is_none());
        assert!(config.chat.is_none());
    }

    #[test]
    fn zero_request_timeout_keeps_the_default() {
        let args = ChatArgs {
            timeout_secs: Some(0),
            ..ChatArgs::default()
        };
        let config = ChatConfig::from(args);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn config_builder_pattern() {
        let config = ChatConfig::new()
            .with_base_url("http://localhost:9000/")
            .with_chat(Some("3".to_string()))
            .with_model(Some("m".to_string()))
            .with_state_file(PathBuf::from("state.json"))
            .with_timeout(Duration::from_secs(1))
            .with_idle_timeout(Some(Duration::from_secs(2)))
            .with_cookie(Some("a=b".to_string()))
            .with_log_level("debug")
            .without_color();

        assert_eq!(config.base_url, "http://localhost:9000/");
        assert_eq!(config.chat.as_deref(), Some("3"));
        assert_eq!(config.model.as_deref(), Some("m"));
        assert_eq!(config.state_file, PathBuf::from("state.json"));
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.cookie.as_deref(), Some("a=b"));
        assert_eq!(config.log_level, "debug");
        assert!(!config.use_color);
    }
}
