use biometrics::{Collector, Counter, Moments};
use tracing_subscriber::EnvFilter;

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("lmchat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("lmchat.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("lmchat.client.request_duration_seconds");
pub(crate) static CANCEL_FAILURES: Counter = Counter::new("lmchat.cancel.failures");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("lmchat.stream.frames");
pub(crate) static STREAM_TRANSPORT_ERRORS: Counter =
    Counter::new("lmchat.stream.transport_errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("lmchat.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("lmchat.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("lmchat.stream.duration_seconds");

pub(crate) static SESSION_STARTED: Counter = Counter::new("lmchat.session.started");
pub(crate) static SESSION_COMPLETED: Counter = Counter::new("lmchat.session.completed");
pub(crate) static SESSION_STOPPED: Counter = Counter::new("lmchat.session.stopped");
pub(crate) static SESSION_ERRORED: Counter = Counter::new("lmchat.session.errored");
pub(crate) static SESSION_STALE_EVENTS: Counter = Counter::new("lmchat.session.stale_events");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_counter(&CANCEL_FAILURES);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_TRANSPORT_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&SESSION_STARTED);
    collector.register_counter(&SESSION_COMPLETED);
    collector.register_counter(&SESSION_STOPPED);
    collector.register_counter(&SESSION_ERRORED);
    collector.register_counter(&SESSION_STALE_EVENTS);
}

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV: &str = "LMCHAT_LOG";

/// Install the global tracing subscriber.
///
/// The filter comes from `LMCHAT_LOG` when set, else from `level`. Output goes
/// to stderr so it does not interleave with streamed replies on stdout. Calling
/// this more than once is harmless.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
