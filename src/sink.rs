//! Upward callback surface consumed by UI/CLI layers.

use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::models::{ChatEvent, RecorderState};

/// Event sink for recorder callbacks.
///
/// Every method fires synchronously from within the core. Implementations
/// must not panic; the core additionally swallows panics at each call site so
/// a misbehaving sink cannot take down a session.
pub trait EventSink: Send + Sync {
    fn on_status(&self, _state: RecorderState) {}
    fn on_chat_message(&self, _event: &ChatEvent) {}
    fn on_log(&self, _text: &str) {}
    fn on_stream_url(&self, _url: &str) {}
}

/// Sink that discards all callbacks.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}

/// Run a sink callback, discarding any panic it raises.
pub(crate) fn guard<F: FnOnce()>(f: F) {
    let _ = catch_unwind(AssertUnwindSafe(f));
}
