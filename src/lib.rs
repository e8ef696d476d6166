// Public modules
pub mod chat;
pub mod client;
pub mod controller;
pub mod error;
pub mod observability;
pub mod registry;
pub mod session;
pub mod sse;
pub mod types;
pub mod view;

// Re-exports
pub use client::{ChatBackend, HttpBackend};
pub use controller::{SessionController, StopSignal, Submission};
pub use error::{Error, Result, StartError};
pub use observability::{init_tracing, register_biometrics};
pub use registry::{FileStore, KeyValueStore, MemoryStore, ModelRegistry};
pub use session::GenerationSession;
pub use sse::{DecoderId, StreamDecoder, decode_sse};
pub use types::*;
pub use view::{ChatView, PlainTextView};
