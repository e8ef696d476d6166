use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire representation of an identifier that the backend may emit either as a
/// JSON number or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

/// Opaque, stable identifier of a chat.
///
/// Chat ids are always handed to us by the backend; lmchat never invents one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "RawId", into = "String")]
pub struct ChatId(String);

impl ChatId {
    /// Wraps an identifier received from the backend.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RawId> for ChatId {
    fn from(raw: RawId) -> Self {
        Self(raw.into())
    }
}

impl From<ChatId> for String {
    fn from(id: ChatId) -> Self {
        id.0
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One entry of the chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// The chat id.
    pub id: ChatId,
    /// The chat title, generated by the backend from the first message.
    pub title: String,
}
