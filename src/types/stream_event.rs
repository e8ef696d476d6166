use serde::{Deserialize, Serialize};

use super::chat::RawId;

/// One decoded unit of the generation stream.
///
/// Events are produced in arrival order and each is delivered exactly once.
/// `Done`, `ServerError` and `TransportError` are terminal: a decoder yields
/// nothing after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Another piece of the assistant's reply.
    ContentDelta(String),
    /// The backend stored the reply under this id.
    MessageIdAssigned(String),
    /// The reply is complete.
    Done,
    /// The backend reported a failure while generating.
    ServerError(String),
    /// The stream broke or carried something we could not decode. The payload
    /// is the raw frame or a description of the failure.
    TransportError(String),
}

impl StreamEvent {
    /// Returns true if no event may follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done | StreamEvent::ServerError(_) | StreamEvent::TransportError(_)
        )
    }
}

/// The JSON record carried by a single `data:` frame.
///
/// Every field is optional on the wire; a frame with none of them is a decode
/// failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrame {
    /// Reply text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Stored message id; the backend sends a number.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_message_id"
    )]
    pub message_id: Option<String>,

    /// Completion marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,

    /// Generation failure reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn deserialize_message_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

impl StreamFrame {
    /// Converts the frame into the events it carries, in delivery order.
    ///
    /// Returns `None` when the frame has no recognised field. An error frame
    /// yields only the error. A frame holding only an empty `content` yields no
    /// events at all.
    pub fn into_events(self) -> Option<Vec<StreamEvent>> {
        if self.content.is_none()
            && self.message_id.is_none()
            && self.done.is_none()
            && self.error.is_none()
        {
            return None;
        }
        if let Some(error) = self.error {
            return Some(vec![StreamEvent::ServerError(error)]);
        }
        let mut events = Vec::with_capacity(2);
        if let Some(id) = self.message_id {
            events.push(StreamEvent::MessageIdAssigned(id));
        }
        if let Some(content) = self.content.filter(|c| !c.is_empty()) {
            events.push(StreamEvent::ContentDelta(content));
        }
        if self.done == Some(true) {
            events.push(StreamEvent::Done);
        }
        Some(events)
    }
}
