//! The state machine of one generation.
//!
//! A [`GenerationSession`] does no I/O of its own. It decides what the
//! controller should send, owns the registered [`StreamDecoder`], folds
//! events into an [`AccumulatedReply`] and reports to a [`ChatView`].

use crate::error::{Error, StartError};
use crate::observability::{
    SESSION_COMPLETED, SESSION_ERRORED, SESSION_STALE_EVENTS, SESSION_STARTED, SESSION_STOPPED,
};
use crate::sse::{DecoderId, StreamDecoder};
use crate::types::{
    AccumulatedReply, CancelRequest, ChatId, GenerationState, ReplyAnnotation,
    SendMessageRequest, StreamEvent, TerminationReason,
};
use crate::view::ChatView;

/// Detail recorded when a decoder ends without a terminal event.
const STREAM_ENDED: &str = "stream ended before the reply completed";

/// One generation, from the user's message to the end of the reply.
///
/// The session is reused across generations: `start` from a terminated
/// session resets the reply and begins anew.
#[derive(Debug, Default)]
pub struct GenerationSession {
    chat: Option<ChatId>,
    model: String,
    state: GenerationState,
    reply: AccumulatedReply,
    decoder: Option<StreamDecoder>,
    request: Option<SendMessageRequest>,
    send_error: Option<String>,
}

impl GenerationSession {
    /// A session in `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state.
    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// The reply of the current (or last) generation.
    pub fn reply(&self) -> &AccumulatedReply {
        &self.reply
    }

    /// The chat of the current (or last) generation.
    pub fn chat(&self) -> Option<&ChatId> {
        self.chat.as_ref()
    }

    /// The model of the current (or last) generation.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The decoder events are currently accepted from.
    pub fn decoder_id(&self) -> Option<DecoderId> {
        self.decoder.as_ref().map(StreamDecoder::id)
    }

    /// The send request of the generation, while it is still awaiting its
    /// acknowledgement.
    pub fn pending_request(&self) -> Option<&SendMessageRequest> {
        match self.state {
            GenerationState::Awaiting => self.request.as_ref(),
            _ => None,
        }
    }

    /// Returns true if the last attempt to send the message failed and
    /// nothing has been sent since.
    pub fn is_unsent(&self) -> bool {
        self.state == GenerationState::Awaiting && self.send_error.is_some()
    }

    /// Begin a generation.
    ///
    /// On success the user's message has been rendered and the returned
    /// request must be sent to the backend. On failure nothing changed.
    pub fn start(
        &mut self,
        chat: ChatId,
        model: &str,
        text: &str,
        view: &mut dyn ChatView,
    ) -> Result<SendMessageRequest, StartError> {
        if !self.state.accepts_start() {
            return Err(StartError::AlreadyActive);
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(StartError::NoModel);
        }
        SESSION_STARTED.click();
        tracing::info!(chat = %chat, model = %model, "generation started");

        let request = SendMessageRequest {
            chat_id: chat.clone(),
            content: text.to_string(),
            model: model.to_string(),
        };
        self.chat = Some(chat);
        self.model = model.to_string();
        self.reply = AccumulatedReply::new();
        self.decoder = None;
        self.send_error = None;
        self.request = Some(request.clone());
        self.state = GenerationState::Awaiting;
        view.render_user_message(text);
        Ok(request)
    }

    /// The backend acknowledged the message and the stream is open.
    ///
    /// Returns false if the session moved on in the meantime (it was stopped,
    /// or already has a stream); the decoder is closed in that case.
    pub fn attach(&mut self, mut decoder: StreamDecoder) -> bool {
        if self.state != GenerationState::Awaiting || self.decoder.is_some() {
            tracing::debug!(decoder = %decoder.id(), state = %self.state, "discarding late stream");
            decoder.close();
            return false;
        }
        tracing::info!(decoder = %decoder.id(), "streaming");
        self.send_error = None;
        self.decoder = Some(decoder);
        self.state = GenerationState::Streaming;
        true
    }

    /// The message could not be sent.
    ///
    /// The session stays `Awaiting` without a stream. The user's message stays
    /// on screen; the user can resend it or stop.
    pub fn send_failed(&mut self, error: &Error, view: &mut dyn ChatView) {
        if self.state != GenerationState::Awaiting {
            return;
        }
        tracing::warn!(error = %error, "failed to send message");
        self.send_error = Some(error.to_string());
        view.render_error(&format!("failed to send message: {error}"));
    }

    /// Give up on a message that could not be sent.
    ///
    /// The session ends as errored without touching the view: the send
    /// failure was already reported, and the backend never saw the message,
    /// so there is nothing to cancel. Returns false unless [`is_unsent`]
    /// holds.
    ///
    /// [`is_unsent`]: Self::is_unsent
    pub fn abandon_unsent(&mut self) -> bool {
        if !self.is_unsent() {
            return false;
        }
        let detail = self.send_error.take().unwrap_or_default();
        tracing::debug!(error = %detail, "abandoning unsent message");
        self.request = None;
        self.state = GenerationState::Terminated(TerminationReason::Errored(detail));
        true
    }

    /// Wait for the next event of the registered decoder.
    ///
    /// Returns `None` when no decoder is registered. A decoder that runs dry
    /// without a terminal event yields a `TransportError`.
    pub async fn next_event(&mut self) -> Option<(DecoderId, StreamEvent)> {
        let decoder = self.decoder.as_mut()?;
        let id = decoder.id();
        let event = decoder
            .next_event()
            .await
            .unwrap_or_else(|| StreamEvent::TransportError(STREAM_ENDED.to_string()));
        Some((id, event))
    }

    /// Apply one event from the decoder identified by `source`.
    ///
    /// Events are dropped unless the session is streaming and `source` is
    /// the registered decoder. Returns true if the event was applied.
    pub fn apply_event(
        &mut self,
        source: DecoderId,
        event: StreamEvent,
        view: &mut dyn ChatView,
    ) -> bool {
        if self.state != GenerationState::Streaming || self.decoder_id() != Some(source) {
            SESSION_STALE_EVENTS.click();
            tracing::debug!(decoder = %source, state = %self.state, "dropping stale event");
            return false;
        }
        match event {
            StreamEvent::ContentDelta(text) => {
                self.reply.push_delta(&text);
                view.render_delta(&text);
            }
            StreamEvent::MessageIdAssigned(id) => {
                tracing::debug!(message_id = %id, "message id assigned");
                self.reply.set_message_id(id);
            }
            StreamEvent::Done => {
                SESSION_COMPLETED.click();
                self.terminate(TerminationReason::Completed, view);
            }
            StreamEvent::ServerError(message) => {
                SESSION_ERRORED.click();
                tracing::warn!(error = %message, "backend reported an error");
                self.reply
                    .annotate(ReplyAnnotation::ServerError(message.clone()));
                view.render_error(&message);
                self.terminate(TerminationReason::Errored(message), view);
            }
            StreamEvent::TransportError(detail) => {
                SESSION_ERRORED.click();
                tracing::warn!(error = %detail, "stream failed");
                self.reply.annotate(ReplyAnnotation::ConnectionError);
                view.render_error(&format!("connection error: {detail}"));
                self.terminate(TerminationReason::Errored(detail), view);
            }
        }
        true
    }

    /// Stop the generation.
    ///
    /// Does nothing unless awaiting or streaming. Otherwise the stream is
    /// closed, the reply is annotated and the session terminates at once.
    ///
    /// A cancellation notice is returned only if a stream was attached; it
    /// should be sent to the backend without waiting on it.
    pub fn stop(&mut self, view: &mut dyn ChatView) -> Option<CancelRequest> {
        if !matches!(
            self.state,
            GenerationState::Awaiting | GenerationState::Streaming
        ) {
            return None;
        }
        let streamed = self.decoder.is_some();
        self.state = GenerationState::Stopping;
        SESSION_STOPPED.click();
        self.reply.annotate(ReplyAnnotation::Stopped);
        self.terminate(TerminationReason::StoppedByUser, view);
        let chat = self.chat.clone().filter(|_| streamed);
        chat.map(|chat_id| CancelRequest { chat_id })
    }

    fn terminate(&mut self, reason: TerminationReason, view: &mut dyn ChatView) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.request = None;
        self.send_error = None;
        tracing::info!(reason = %reason, chars = self.reply.text().len(), "generation ended");
        view.render_final(&reason);
        self.state = GenerationState::Terminated(reason);
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::view::recording::{RecordingView, ViewCall};

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::ContentDelta(text.to_string())
    }

    fn streaming(session: &mut GenerationSession, view: &mut RecordingView) -> DecoderId {
        session
            .start(ChatId::from("1"), "m", "hi", view)
            .unwrap();
        let decoder = StreamDecoder::from_stream(stream::pending::<StreamEvent>());
        let id = decoder.id();
        assert!(session.attach(decoder));
        id
    }

    #[test]
    fn start_renders_user_message_and_builds_request() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let request = session
            .start(ChatId::from("7"), " m ", "hello", &mut view)
            .unwrap();
        assert_eq!(request.chat_id.as_str(), "7");
        assert_eq!(request.content, "hello");
        assert_eq!(request.model, "m");
        assert_eq!(session.state(), &GenerationState::Awaiting);
        assert_eq!(session.pending_request(), Some(&request));
        assert_eq!(view.calls(), &[ViewCall::UserMessage("hello".into())]);
    }

    #[test]
    fn start_without_model_changes_nothing() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        assert_eq!(
            session.start(ChatId::from("1"), "", "hi", &mut view),
            Err(StartError::NoModel)
        );
        assert_eq!(session.state(), &GenerationState::Idle);
        assert!(view.calls().is_empty());
    }

    #[test]
    fn start_while_active_is_rejected() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        streaming(&mut session, &mut view);
        assert_eq!(
            session.start(ChatId::from("1"), "m", "again", &mut view),
            Err(StartError::AlreadyActive)
        );
        assert_eq!(session.state(), &GenerationState::Streaming);
    }

    #[test]
    fn deltas_concatenate_around_message_ids() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        for event in [
            delta("a"),
            StreamEvent::MessageIdAssigned("42".into()),
            delta("b"),
            delta(""),
            delta("c"),
        ] {
            assert!(session.apply_event(id, event, &mut view));
        }
        assert_eq!(session.reply().text(), "abc");
        assert_eq!(session.reply().message_id(), Some("42"));
        assert_eq!(session.state(), &GenerationState::Streaming);
    }

    #[test]
    fn done_completes_and_closes() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, delta("He"), &mut view);
        session.apply_event(id, delta("llo"), &mut view);
        session.apply_event(id, StreamEvent::Done, &mut view);
        assert_eq!(
            session.state(),
            &GenerationState::Terminated(TerminationReason::Completed)
        );
        assert_eq!(session.reply().rendered(), "Hello");
        assert_eq!(session.decoder_id(), None);
        assert_eq!(
            view.calls().last(),
            Some(&ViewCall::Final(TerminationReason::Completed))
        );
    }

    #[test]
    fn events_after_termination_are_ignored() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, delta("x"), &mut view);
        session.apply_event(id, StreamEvent::Done, &mut view);
        let before = session.reply().clone();
        for event in [
            delta("y"),
            StreamEvent::MessageIdAssigned("9".into()),
            StreamEvent::ServerError("late".into()),
            StreamEvent::Done,
        ] {
            assert!(!session.apply_event(id, event, &mut view));
        }
        assert_eq!(session.reply(), &before);
        assert_eq!(
            session.state(),
            &GenerationState::Terminated(TerminationReason::Completed)
        );
    }

    #[test]
    fn events_from_other_decoders_are_ignored() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        streaming(&mut session, &mut view);
        let stranger = StreamDecoder::from_events(Vec::new()).id();
        assert!(!session.apply_event(stranger, delta("nope"), &mut view));
        assert_eq!(session.reply().text(), "");
    }

    #[test]
    fn server_error_preserves_partial_reply() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, delta("Par"), &mut view);
        session.apply_event(id, StreamEvent::ServerError("rate limited".into()), &mut view);
        assert_eq!(
            session.state(),
            &GenerationState::Terminated(TerminationReason::Errored("rate limited".into()))
        );
        assert_eq!(session.reply().text(), "Par");
        assert_eq!(session.reply().rendered(), "Par\nError: rate limited");
        assert_eq!(view.errors(), vec!["rate limited"]);
    }

    #[test]
    fn transport_error_annotates_connection() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, StreamEvent::TransportError("{bad".into()), &mut view);
        assert_eq!(
            session.reply().annotation(),
            Some(&ReplyAnnotation::ConnectionError)
        );
        assert!(session.state().is_terminal());
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, delta("Par"), &mut view);

        let cancel = session.stop(&mut view).unwrap();
        assert_eq!(cancel.chat_id.as_str(), "1");
        let after_first = (session.state().clone(), session.reply().clone());
        let calls = view.calls().len();

        assert!(session.stop(&mut view).is_none());
        assert_eq!(
            (session.state().clone(), session.reply().clone()),
            after_first
        );
        assert_eq!(view.calls().len(), calls);
        assert_eq!(session.reply().rendered(), "Par [Generation stopped]");
        assert!(!session.apply_event(id, delta("more"), &mut view));
    }

    #[test]
    fn stop_from_idle_does_nothing() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        assert!(session.stop(&mut view).is_none());
        assert_eq!(session.state(), &GenerationState::Idle);
        assert!(view.calls().is_empty());
    }

    #[test]
    fn stop_while_awaiting_discards_late_stream() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        session.start(ChatId::from("1"), "m", "hi", &mut view).unwrap();
        assert!(session.stop(&mut view).is_none());
        assert_eq!(
            session.state(),
            &GenerationState::Terminated(TerminationReason::StoppedByUser)
        );
        let late = StreamDecoder::from_events(vec![delta("x"), StreamEvent::Done]);
        assert!(!session.attach(late));
        assert_eq!(session.decoder_id(), None);
    }

    #[test]
    fn send_failure_keeps_awaiting() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        session.start(ChatId::from("1"), "m", "hi", &mut view).unwrap();
        session.send_failed(&Error::connection("refused", None), &mut view);
        assert_eq!(session.state(), &GenerationState::Awaiting);
        assert!(session.is_unsent());
        assert!(session.pending_request().is_some());
        assert_eq!(view.errors().len(), 1);
        assert_eq!(view.calls()[0], ViewCall::UserMessage("hi".into()));
    }

    #[test]
    fn unsent_message_is_abandoned_quietly() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        session.start(ChatId::from("1"), "m", "hi", &mut view).unwrap();
        assert!(!session.abandon_unsent());

        session.send_failed(&Error::connection("refused", None), &mut view);
        let calls = view.calls().len();
        assert!(session.abandon_unsent());
        assert!(matches!(
            session.state(),
            GenerationState::Terminated(TerminationReason::Errored(_))
        ));
        assert!(!session.is_unsent());
        assert!(session.pending_request().is_none());
        assert_eq!(view.calls().len(), calls);

        session
            .start(ChatId::from("1"), "m", "second", &mut view)
            .unwrap();
        assert_eq!(session.state(), &GenerationState::Awaiting);
    }

    #[test]
    fn restart_after_termination_resets_reply() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        let id = streaming(&mut session, &mut view);
        session.apply_event(id, delta("old"), &mut view);
        session.apply_event(id, StreamEvent::Done, &mut view);
        session
            .start(ChatId::from("1"), "m", "again", &mut view)
            .unwrap();
        assert_eq!(session.reply().text(), "");
        assert_eq!(session.state(), &GenerationState::Awaiting);
    }

    #[tokio::test]
    async fn next_event_follows_the_decoder() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        assert!(session.next_event().await.is_none());

        session.start(ChatId::from("1"), "m", "hi", &mut view).unwrap();
        let decoder = StreamDecoder::from_events(vec![delta("He"), delta("llo"), StreamEvent::Done]);
        session.attach(decoder);
        while let Some((id, event)) = session.next_event().await {
            session.apply_event(id, event, &mut view);
        }
        assert_eq!(session.reply().text(), "Hello");
        assert_eq!(view.transcript(), "Hello");
    }

    #[tokio::test]
    async fn decoder_running_dry_is_a_transport_error() {
        let mut session = GenerationSession::new();
        let mut view = RecordingView::new();
        session.start(ChatId::from("1"), "m", "hi", &mut view).unwrap();
        session.attach(StreamDecoder::from_events(vec![delta("x")]));
        while let Some((id, event)) = session.next_event().await {
            session.apply_event(id, event, &mut view);
        }
        assert_eq!(
            session.state(),
            &GenerationState::Terminated(TerminationReason::Errored(STREAM_ENDED.into()))
        );
        assert_eq!(session.reply().text(), "x");
    }
}
