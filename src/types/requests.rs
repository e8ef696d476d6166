use serde::{Deserialize, Serialize};

use super::chat::{ChatId, RawId};

/// Body of the message submission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// The user's text.
    pub content: String,
    /// Model that will answer.
    pub model: String,
}

/// Reply to a message submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAck {
    /// `"success"` when the message was stored.
    pub status: String,

    /// Id of the stored user message.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_id"
    )]
    pub message_id: Option<String>,

    /// New chat title, sent after the first message of a chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_chat_title: Option<String>,
}

impl SendAck {
    /// Returns true if the backend accepted the message.
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// Body of the best-effort cancellation notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Chat whose generation should stop.
    pub chat_id: ChatId,
}

/// Body of the chat rename request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameChatRequest {
    /// Chat to rename.
    pub chat_id: ChatId,
    /// The new title.
    pub title: String,
}

/// `{"success": bool}` replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Whether the operation took effect.
    #[serde(default)]
    pub success: bool,
}
