/// Text appended to a partial reply when the user stops a generation.
pub const STOPPED_ANNOTATION: &str = " [Generation stopped]";

/// Text appended to a partial reply when the stream breaks.
pub const CONNECTION_ERROR_ANNOTATION: &str = "\n[Connection error]";

/// A note attached to the end of a reply that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAnnotation {
    /// The user stopped the generation.
    Stopped,
    /// The backend sent an error frame.
    ServerError(String),
    /// The stream broke or could not be decoded.
    ConnectionError,
}

impl ReplyAnnotation {
    /// The text shown after the partial reply.
    pub fn text(&self) -> String {
        match self {
            ReplyAnnotation::Stopped => STOPPED_ANNOTATION.to_string(),
            ReplyAnnotation::ServerError(message) => format!("\nError: {message}"),
            ReplyAnnotation::ConnectionError => CONNECTION_ERROR_ANNOTATION.to_string(),
        }
    }
}

/// The assistant reply built up from the current generation's events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedReply {
    text: String,
    message_id: Option<String>,
    annotation: Option<ReplyAnnotation>,
}

impl AccumulatedReply {
    /// An empty reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// The concatenation of every content delta so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The id the backend stored the reply under, once known.
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// The closing annotation, if the reply ended abnormally.
    pub fn annotation(&self) -> Option<&ReplyAnnotation> {
        self.annotation.as_ref()
    }

    /// The reply text followed by its annotation.
    pub fn rendered(&self) -> String {
        match &self.annotation {
            Some(annotation) => format!("{}{}", self.text, annotation.text()),
            None => self.text.clone(),
        }
    }

    /// Returns true if no content has arrived.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub(crate) fn push_delta(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub(crate) fn set_message_id(&mut self, id: String) {
        self.message_id = Some(id);
    }

    pub(crate) fn annotate(&mut self, annotation: ReplyAnnotation) {
        self.annotation = Some(annotation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_appends_annotation() {
        let mut reply = AccumulatedReply::new();
        reply.push_delta("Par");
        reply.annotate(ReplyAnnotation::Stopped);
        assert_eq!(reply.text(), "Par");
        assert_eq!(reply.rendered(), "Par [Generation stopped]");
    }

    #[test]
    fn server_error_annotation() {
        let mut reply = AccumulatedReply::new();
        reply.annotate(ReplyAnnotation::ServerError("rate limited".to_string()));
        assert!(reply.is_empty());
        assert_eq!(reply.rendered(), "\nError: rate limited");
    }
}
