//! Presentation of a chat.
//!
//! The session and the controller only ever talk to a [`ChatView`]. The
//! terminal implementation is [`PlainTextView`].

use std::io::{self, Stdout, Write};

use crate::types::{ChatId, TerminationReason};

/// ANSI escape code for bold text.
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code for dim text.
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for italic text.
const ANSI_ITALIC: &str = "\x1b[3m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user's turn).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Sink for everything a chat shows.
pub trait ChatView: Send {
    /// Show the user's message. Called before the backend acknowledges it.
    fn render_user_message(&mut self, text: &str);

    /// Show a chunk of the assistant's reply.
    ///
    /// This is called incrementally as content is streamed.
    fn render_delta(&mut self, text: &str);

    /// The reply is over.
    fn render_final(&mut self, reason: &TerminationReason);

    /// Show an error.
    fn render_error(&mut self, text: &str);

    /// Toggle between "send" and "stop" affordances.
    fn set_generating_affordance(&mut self, generating: bool);

    /// The backend renamed a chat.
    fn render_chat_title(&mut self, chat: &ChatId, title: &str);

    /// Print an informational message.
    fn render_info(&mut self, info: &str);
}

/// Plain text view with optional ANSI styling.
pub struct PlainTextView {
    stdout: Stdout,
    use_color: bool,
    generating: bool,
    mid_line: bool,
}

impl PlainTextView {
    /// Creates a new PlainTextView with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextView with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            generating: false,
            mid_line: false,
        }
    }

    /// Whether a reply is currently being generated.
    pub fn is_generating(&self) -> bool {
        self.generating
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }
}

impl Default for PlainTextView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView for PlainTextView {
    fn render_user_message(&mut self, text: &str) {
        self.end_line();
        if self.use_color {
            println!("{ANSI_CYAN}{ANSI_BOLD}you>{ANSI_RESET} {}", markdown_to_ansi(text));
        } else {
            println!("you> {text}");
        }
        self.flush();
    }

    fn render_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        print!("{text}");
        self.mid_line = !text.ends_with('\n');
        self.flush();
    }

    fn render_final(&mut self, reason: &TerminationReason) {
        match reason {
            TerminationReason::Completed => {}
            TerminationReason::StoppedByUser => {
                let annotation = crate::types::STOPPED_ANNOTATION;
                if self.use_color {
                    print!("{ANSI_DIM}{ANSI_ITALIC}{annotation}{ANSI_RESET}");
                } else {
                    print!("{annotation}");
                }
                self.mid_line = true;
            }
            TerminationReason::Errored(_) => {}
        }
        self.end_line();
        self.flush();
    }

    fn render_error(&mut self, text: &str) {
        self.end_line();
        if self.use_color {
            eprintln!("{ANSI_RED}Error: {text}{ANSI_RESET}");
        } else {
            eprintln!("Error: {text}");
        }
    }

    fn set_generating_affordance(&mut self, generating: bool) {
        self.generating = generating;
    }

    fn render_chat_title(&mut self, chat: &ChatId, title: &str) {
        self.end_line();
        if self.use_color {
            println!("{ANSI_DIM}[chat {chat}: {title}]{ANSI_RESET}");
        } else {
            println!("[chat {chat}: {title}]");
        }
    }

    fn render_info(&mut self, info: &str) {
        self.end_line();
        println!("{info}");
    }
}

/// Convert a small subset of markdown to ANSI styling.
///
/// Handles `#` headings, `**bold**`, `*italic*` and `- ` bullets. Anything
/// else passes through untouched.
pub fn markdown_to_ansi(text: &str) -> String {
    text.lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if let Some(heading) = strip_heading(trimmed) {
                format!("{ANSI_BOLD}{}{ANSI_RESET}", inline_to_ansi(heading))
            } else if let Some(item) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            {
                let indent = &line[..line.len() - trimmed.len()];
                format!("{indent}• {}", inline_to_ansi(item))
            } else {
                inline_to_ansi(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_heading(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if (1..=6).contains(&hashes) {
        line[hashes..].strip_prefix(' ')
    } else {
        None
    }
}

fn inline_to_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("**")
            && let Some(end) = after.find("**")
            && end > 0
        {
            out.push_str(ANSI_BOLD);
            out.push_str(&after[..end]);
            out.push_str(ANSI_RESET);
            rest = &after[end + 2..];
            continue;
        }
        if let Some(after) = rest.strip_prefix('*')
            && let Some(end) = after.find('*')
            && end > 0
        {
            out.push_str(ANSI_ITALIC);
            out.push_str(&after[..end]);
            out.push_str(ANSI_RESET);
            rest = &after[end + 1..];
            continue;
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(c);
        }
        rest = chars.as_str();
    }
    out
}

/////////////////////////////////////////////// RecordingView //////////////////////////////////////////////

#[cfg(test)]
pub(crate) mod recording {
    use super::ChatView;
    use crate::types::{ChatId, TerminationReason};

    /// One call made on a [`RecordingView`].
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub(crate) enum ViewCall {
        UserMessage(String),
        Delta(String),
        Final(TerminationReason),
        Error(String),
        Generating(bool),
        ChatTitle(ChatId, String),
        Info(String),
    }

    /// A view that remembers every call, in order.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingView {
        calls: Vec<ViewCall>,
    }

    impl RecordingView {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn calls(&self) -> &[ViewCall] {
            &self.calls
        }

        /// The concatenation of every delta.
        pub(crate) fn transcript(&self) -> String {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    ViewCall::Delta(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }

        pub(crate) fn errors(&self) -> Vec<&str> {
            self.calls
                .iter()
                .filter_map(|call| match call {
                    ViewCall::Error(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    impl ChatView for RecordingView {
        fn render_user_message(&mut self, text: &str) {
            self.calls.push(ViewCall::UserMessage(text.to_string()));
        }

        fn render_delta(&mut self, text: &str) {
            self.calls.push(ViewCall::Delta(text.to_string()));
        }

        fn render_final(&mut self, reason: &TerminationReason) {
            self.calls.push(ViewCall::Final(reason.clone()));
        }

        fn render_error(&mut self, text: &str) {
            self.calls.push(ViewCall::Error(text.to_string()));
        }

        fn set_generating_affordance(&mut self, generating: bool) {
            self.calls.push(ViewCall::Generating(generating));
        }

        fn render_chat_title(&mut self, chat: &ChatId, title: &str) {
            self.calls
                .push(ViewCall::ChatTitle(chat.clone(), title.to_string()));
        }

        fn render_info(&mut self, info: &str) {
            self.calls.push(ViewCall::Info(info.to_string()));
        }
    }
}
