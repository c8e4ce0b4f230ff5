//! Live-broadcast recording orchestration.
//!
//! Watches a named live account, records its stream while capturing the chat
//! feed, and burns a timed chat overlay into the final video. The crate
//! provides the state machine ([`recorder::Recorder`]), the chat-capture
//! adapter, the external-process-backed stream recorder and overlay encoder,
//! the subtitle generator, and the shared per-key rate limiter. The live
//! protocol itself is abstracted behind [`client::LiveClient`]; callers plug
//! in a concrete transport and receive progress through [`sink::EventSink`].

pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod overlay;
pub mod rate_limiter;
pub mod recorder;
pub mod sink;
pub mod stream;
pub mod subtitle;
pub mod utils;

pub use client::{ClientError, ClientInit, LiveClient, LiveClientFactory, LiveEvent};
pub use config::{Config, CornerPosition};
pub use error::{Error, Result};
pub use models::{ChatEvent, ChatEventKind, RecorderState, RecordingSession};
pub use rate_limiter::RateLimiter;
pub use recorder::{Recorder, RecorderHandle};
pub use sink::{EventSink, NullSink};
