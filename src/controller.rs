//! Binds the open chat to one [`GenerationSession`] and drives it.
//!
//! The controller is the only place that talks to the backend. It turns user
//! intents (submit, stop, switch chat, pick a model) into session transitions
//! and pumps stream events into the session until the generation ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::client::ChatBackend;
use crate::error::{Error, Result, StartError};
use crate::observability::CANCEL_FAILURES;
use crate::registry::{KeyValueStore, ModelRegistry};
use crate::session::GenerationSession;
use crate::sse::{DecoderId, StreamDecoder};
use crate::types::{
    AccumulatedReply, CancelRequest, ChatId, ChatSummary, GenerationState, RenameChatRequest,
    SendAck, SendMessageRequest, StreamEvent,
};
use crate::view::ChatView;

/////////////////////////////////////////////// StopSignal ///////////////////////////////////////////////

/// A stop request that can be raised from anywhere, including a signal
/// handler thread. The controller watches its own signal while a message is
/// being sent and while the reply streams; see
/// [`SessionController::stop_signal`].
#[derive(Debug, Default)]
pub struct StopSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Forget any stop requested so far.
    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Returns true if a stop is pending.
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Wait until a stop is requested, consuming the request.
    pub async fn raised(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.raised.swap(false, Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/////////////////////////////////////////////// Submission ///////////////////////////////////////////////

/// What a submission did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// A generation started.
    Started,
    /// A generation was active, so the submission stopped it instead.
    Stopped,
    /// The generation could not start.
    Rejected(StartError),
}

enum Step {
    Stop,
    Event(DecoderId, StreamEvent),
    Drained,
}

//////////////////////////////////////////// SessionController ///////////////////////////////////////////

/// Owns the open chat, its generation, the model registry and the view.
pub struct SessionController<B, S, V>
where
    B: ChatBackend + 'static,
    S: KeyValueStore,
    V: ChatView,
{
    backend: Arc<B>,
    registry: ModelRegistry<S>,
    view: V,
    chat: Option<ChatId>,
    session: GenerationSession,
    idle_timeout: Option<Duration>,
    stop_signal: Arc<StopSignal>,
    cancellations: Vec<JoinHandle<()>>,
}

impl<B, S, V> SessionController<B, S, V>
where
    B: ChatBackend + 'static,
    S: KeyValueStore,
    V: ChatView,
{
    /// A controller with no chat open.
    pub fn new(backend: Arc<B>, registry: ModelRegistry<S>, view: V) -> Self {
        Self {
            backend,
            registry,
            view,
            chat: None,
            session: GenerationSession::new(),
            idle_timeout: None,
            stop_signal: Arc::new(StopSignal::new()),
            cancellations: Vec::new(),
        }
    }

    /// Fail streams that stay silent for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// The signal that stops the generation in flight. Raise it from
    /// another task or thread; the controller acts on it at its next await.
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop_signal)
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn registry(&self) -> &ModelRegistry<S> {
        &self.registry
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// The chat currently open, if any.
    pub fn current_chat(&self) -> Option<&ChatId> {
        self.chat.as_ref()
    }

    /// State of the current generation.
    pub fn state(&self) -> &GenerationState {
        self.session.state()
    }

    /// Reply of the current (or last) generation.
    pub fn reply(&self) -> &AccumulatedReply {
        self.session.reply()
    }

    pub fn session(&self) -> &GenerationSession {
        &self.session
    }

    ///////////////////////////////////////////// models /////////////////////////////////////////////

    /// Fetch the model catalog and hand it to the registry.
    pub async fn refresh_models(&mut self) -> Result<()> {
        let models = self.backend.list_models().await?;
        tracing::debug!(count = models.len(), "model catalog loaded");
        self.registry.populate(models)
    }

    /// Select a model and persist it. An empty id clears the selection.
    pub fn set_model(&mut self, id: &str) -> Result<()> {
        self.registry.select(id)
    }

    ///////////////////////////////////////////// chats //////////////////////////////////////////////

    /// The backend's chat list.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        self.backend.list_chats().await
    }

    /// Switch to `chat`. Any generation in flight is stopped first.
    pub fn open_chat(&mut self, chat: ChatId) {
        self.stop();
        tracing::info!(chat = %chat, "chat opened");
        self.chat = Some(chat);
        self.session = GenerationSession::new();
    }

    /// Create a chat on the backend and switch to it.
    pub async fn new_chat(&mut self) -> Result<ChatSummary> {
        let summary = self.backend.create_chat().await?;
        self.open_chat(summary.id.clone());
        Ok(summary)
    }

    /// Delete a chat. If it is the open one, its generation is stopped and
    /// no chat is open afterwards.
    pub async fn delete_chat(&mut self, chat: &ChatId) -> Result<()> {
        let is_current = self.chat.as_ref() == Some(chat);
        if is_current {
            self.stop();
        }
        self.backend.delete_chat(chat).await?;
        if is_current {
            self.chat = None;
            self.session = GenerationSession::new();
        }
        Ok(())
    }

    /// Rename the open chat.
    pub async fn rename_chat(&mut self, title: &str) -> Result<()> {
        let chat_id = self.require_chat()?;
        let request = RenameChatRequest {
            chat_id: chat_id.clone(),
            title: title.trim().to_string(),
        };
        self.backend.rename_chat(&request).await?;
        self.view.render_chat_title(&chat_id, &request.title);
        Ok(())
    }

    ////////////////////////////////////////// generation ////////////////////////////////////////////

    /// The send button: stops the generation if one is active, starts one
    /// otherwise. A message whose send failed does not count as active; the
    /// new text replaces it.
    pub async fn submit(&mut self, text: &str) -> Result<Submission> {
        if self.session.state().is_active() && !self.session.is_unsent() {
            self.stop();
            return Ok(Submission::Stopped);
        }
        self.start(text).await
    }

    /// Start a generation for `text` in the open chat, stopping any previous
    /// one first.
    ///
    /// Returns once the message is sent and the stream is attached; use
    /// [`drive`](Self::drive) or [`step`](Self::step) to consume it. A stop
    /// raised while sending ends the generation before the stream is opened.
    pub async fn start(&mut self, text: &str) -> Result<Submission> {
        let chat = self.require_chat()?;
        self.session.abandon_unsent();
        self.stop();
        let model = self.registry.selection().as_str().to_string();
        match self.session.start(chat, &model, text, &mut self.view) {
            Ok(request) => {
                self.view.set_generating_affordance(true);
                self.send(request).await;
                Ok(Submission::Started)
            }
            Err(err) => {
                tracing::debug!(error = %err, "generation not started");
                self.view.set_generating_affordance(false);
                Ok(Submission::Rejected(err))
            }
        }
    }

    /// Send the pending message again after a failed send.
    ///
    /// Returns false if no message is waiting to be sent.
    pub async fn retry(&mut self) -> bool {
        let Some(request) = self.session.pending_request().cloned() else {
            return false;
        };
        self.send(request).await;
        true
    }

    /// Stop the active generation.
    ///
    /// Local state is final when this returns. If a stream was open, the
    /// backend is told to cancel in the background. Returns false if nothing
    /// was active.
    pub fn stop(&mut self) -> bool {
        if !self.session.state().is_active() {
            return false;
        }
        let cancel = self.session.stop(&mut self.view);
        self.view.set_generating_affordance(false);
        if let Some(cancel) = cancel {
            self.dispatch_cancel(cancel);
        }
        true
    }

    /// Apply stream events until the generation ends, the stop signal is
    /// raised or no stream is attached.
    pub async fn drive(&mut self) {
        let stop = Arc::clone(&self.stop_signal);
        loop {
            let step = tokio::select! {
                biased;
                _ = stop.raised() => Step::Stop,
                next = self.session.next_event() => match next {
                    Some((source, event)) => Step::Event(source, event),
                    None => Step::Drained,
                },
            };
            match step {
                Step::Stop => {
                    self.stop();
                }
                Step::Event(source, event) => {
                    self.apply(source, event);
                }
                Step::Drained => break,
            }
            if !self.session.state().is_active() {
                break;
            }
        }
    }

    /// Apply the next stream event. Returns false if no stream is attached.
    pub async fn step(&mut self) -> bool {
        match self.session.next_event().await {
            Some((source, event)) => {
                self.apply(source, event);
                true
            }
            None => false,
        }
    }

    /// Wait for outstanding cancellation notices to finish.
    pub async fn settle(&mut self) {
        for handle in self.cancellations.drain(..) {
            let _ = handle.await;
        }
    }

    fn apply(&mut self, source: DecoderId, event: StreamEvent) {
        let applied = self.session.apply_event(source, event, &mut self.view);
        if applied && self.session.state().is_terminal() {
            self.view.set_generating_affordance(false);
        }
    }

    async fn send(&mut self, request: SendMessageRequest) {
        let backend = Arc::clone(&self.backend);
        let stop = Arc::clone(&self.stop_signal);
        let outcome = tokio::select! {
            biased;
            _ = stop.raised() => None,
            outcome = open_reply(backend.as_ref(), &request) => Some(outcome),
        };
        let (ack, opened) = match outcome {
            None => {
                tracing::debug!(chat = %request.chat_id, "stopped while sending");
                self.stop();
                return;
            }
            Some(Err(err)) => {
                self.session.send_failed(&err, &mut self.view);
                return;
            }
            Some(Ok(reply)) => reply,
        };
        if let Some(title) = ack.updated_chat_title.as_deref() {
            self.view.render_chat_title(&request.chat_id, title);
        }
        let decoder = match opened {
            Ok(decoder) => match self.idle_timeout {
                Some(timeout) => decoder.with_idle_timeout(timeout),
                None => decoder,
            },
            Err(err) => {
                tracing::warn!(error = %err, "failed to open the reply stream");
                StreamDecoder::from_events([StreamEvent::TransportError(err.to_string())])
            }
        };
        self.session.attach(decoder);
    }

    fn dispatch_cancel(&mut self, cancel: CancelRequest) {
        self.cancellations.retain(|handle| !handle.is_finished());
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(chat = %cancel.chat_id, "no runtime; cancellation notice not sent");
            return;
        };
        let backend = Arc::clone(&self.backend);
        self.cancellations.push(runtime.spawn(async move {
            if let Err(err) = backend.cancel_generation(&cancel).await {
                CANCEL_FAILURES.click();
                tracing::warn!(chat = %cancel.chat_id, error = %err, "cancellation notice failed");
            }
        }));
    }

    fn require_chat(&self) -> Result<ChatId> {
        self.chat
            .clone()
            .ok_or_else(|| Error::validation("no chat is open", Some("chat_id".to_string())))
    }
}

/// Post the message, then open its reply stream. A failed send is an error;
/// a stream that fails to open is left for the caller to report.
async fn open_reply<B: ChatBackend>(
    backend: &B,
    request: &SendMessageRequest,
) -> Result<(SendAck, Result<StreamDecoder>)> {
    let ack = backend.send_message(request).await?;
    let opened = backend.open_stream(&request.chat_id, &request.model).await;
    Ok((ack, opened))
}
