//! Server-Sent Events decoding for the generation stream.
//!
//! This module turns the raw byte stream of a `get_response` call into an
//! ordered sequence of [`StreamEvent`]s. A [`StreamDecoder`] owns one such
//! subscription; closing it drops the underlying transport.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{
    STREAM_BYTES, STREAM_DURATION, STREAM_FRAMES, STREAM_TRANSPORT_ERRORS, STREAM_TTFB,
};
use crate::{Result, StreamEvent, StreamFrame};

static NEXT_DECODER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one decoder instance.
///
/// Every decoder gets a fresh id, so events can always be traced back to the
/// subscription that produced them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecoderId(u64);

impl DecoderId {
    fn next() -> Self {
        Self(NEXT_DECODER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decoder#{}", self.0)
    }
}

type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// A single subscription to the generation stream.
///
/// The decoder yields events lazily and stops for good after `Done`,
/// `ServerError` or `TransportError`. It never retries. [`close`](Self::close)
/// may be called any number of times, before or after natural completion.
pub struct StreamDecoder {
    id: DecoderId,
    events: Option<EventStream>,
    idle_timeout: Option<Duration>,
}

impl StreamDecoder {
    /// Decodes an SSE byte stream, e.g. the body of an HTTP response.
    pub fn from_bytes<S>(byte_stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self::from_stream(decode_sse(byte_stream))
    }

    /// Wraps an already-decoded event stream.
    ///
    /// Terminal events still end the subscription, whatever the inner stream
    /// would yield afterwards.
    pub fn from_stream<S>(events: S) -> Self
    where
        S: Stream<Item = StreamEvent> + Send + 'static,
    {
        Self {
            id: DecoderId::next(),
            events: Some(Box::pin(events)),
            idle_timeout: None,
        }
    }

    /// Wraps a literal sequence of events.
    pub fn from_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = StreamEvent>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(stream::iter(events))
    }

    /// Yields `TransportError("idle timeout")` whenever no event arrives within
    /// `timeout`. Disabled by default: a stalled stream otherwise waits forever.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// This decoder's identity.
    pub fn id(&self) -> DecoderId {
        self.id
    }

    /// Returns true once the decoder has been closed or has finished.
    pub fn is_closed(&self) -> bool {
        self.events.is_none()
    }

    /// Tears down the subscription. Idempotent.
    pub fn close(&mut self) {
        if self.events.take().is_some() {
            tracing::debug!(decoder = %self.id, "stream decoder closed");
        }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the decoder is closed. The event that ends the
    /// stream is returned and the decoder closes itself right after.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let events = self.events.as_mut()?;
        let event = match self.idle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, events.next()).await {
                Ok(event) => event,
                Err(_) => {
                    STREAM_TRANSPORT_ERRORS.click();
                    Some(StreamEvent::TransportError("idle timeout".to_string()))
                }
            },
            None => events.next().await,
        };
        self.observe(event)
    }

    fn observe(&mut self, event: Option<StreamEvent>) -> Option<StreamEvent> {
        match &event {
            Some(event) if event.is_terminal() => self.close(),
            Some(_) => {}
            None => self.close(),
        }
        event
    }
}

impl Stream for StreamDecoder {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(events) = self.events.as_mut() else {
            return Poll::Ready(None);
        };
        match events.as_mut().poll_next(cx) {
            Poll::Ready(event) => Poll::Ready(self.observe(event)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl Drop for StreamDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/////////////////////////////////////////////// decoding ///////////////////////////////////////////////

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<StreamEvent>,
    finished: bool,
    started: Instant,
    first_byte: bool,
}

/// Process a stream of bytes into a stream of generation events.
///
/// Frames are separated by a blank line and carry their JSON record on one or
/// more `data:` lines. Each frame may expand to several events. Decoding stops
/// after the first terminal event; if the body ends before one, a
/// `TransportError` is emitted.
pub fn decode_sse<S>(byte_stream: S) -> impl Stream<Item = StreamEvent> + Send
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let state = DecodeState {
        bytes: Box::pin(byte_stream),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
        started: Instant::now(),
        first_byte: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(event) = state.pending.pop_front() {
                if event.is_terminal() {
                    state.finished = true;
                    state.pending.clear();
                    STREAM_DURATION.add(state.started.elapsed().as_secs_f64());
                }
                return Some((event, state));
            }

            // First check if we have a complete frame in the buffer
            if let Some(frame) = take_frame(&mut state.buffer) {
                state.pending.extend(parse_frame(&frame));
                continue;
            }

            // Read more data
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    if !state.first_byte {
                        state.first_byte = true;
                        STREAM_TTFB.add(state.started.elapsed().as_secs_f64());
                    }
                    STREAM_BYTES.count(chunk.len() as u64);
                    state
                        .buffer
                        .extend(chunk.iter().copied().filter(|b| *b != b'\r'));
                }
                Some(Err(e)) => {
                    STREAM_TRANSPORT_ERRORS.click();
                    state
                        .pending
                        .push_back(StreamEvent::TransportError(format!("Error in HTTP stream: {e}")));
                }
                None => {
                    // End of stream
                    let rest = std::mem::take(&mut state.buffer);
                    if !rest.iter().all(u8::is_ascii_whitespace) {
                        state.pending.extend(parse_frame(&rest));
                    }
                    if !state.pending.iter().any(StreamEvent::is_terminal) {
                        STREAM_TRANSPORT_ERRORS.click();
                        state.pending.push_back(StreamEvent::TransportError(
                            "connection closed before the reply completed".to_string(),
                        ));
                    }
                }
            }
        }
    })
}

/// Remove and return the first complete frame, if the buffer holds one.
fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let frame = buffer[..end].to_vec();
    buffer.drain(..end + 2);
    Some(frame)
}

/// Parse one frame into the events it carries.
///
/// Comment lines and `event:`/`id:`/`retry:` fields are ignored. A frame that
/// is not valid UTF-8, or whose data is not a recognised record, becomes a
/// `TransportError` holding the raw payload.
fn parse_frame(frame: &[u8]) -> Vec<StreamEvent> {
    let text = match std::str::from_utf8(frame) {
        Ok(text) => text,
        Err(e) => {
            STREAM_TRANSPORT_ERRORS.click();
            return vec![StreamEvent::TransportError(format!(
                "Invalid UTF-8 in stream: {e}"
            ))];
        }
    };

    let data = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect::<Vec<_>>();
    if data.is_empty() {
        return Vec::new();
    }
    let data = data.join("\n");

    STREAM_FRAMES.click();
    match serde_json::from_str::<StreamFrame>(&data)
        .ok()
        .and_then(StreamFrame::into_events)
    {
        Some(events) => {
            tracing::debug!(frame = %data, events = events.len(), "decoded stream frame");
            events
        }
        None => {
            STREAM_TRANSPORT_ERRORS.click();
            tracing::warn!(frame = %data, "undecodable stream frame");
            vec![StreamEvent::TransportError(data)]
        }
    }
}
