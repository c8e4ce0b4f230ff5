//! Core domain types: chat events, recording sessions, recorder states.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Kind of a captured chat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    #[default]
    Comment,
    Gift,
    Join,
}

/// A single captured chat event.
///
/// Immutable once created; the field names form the chat-log JSONL contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Seconds since recording start.
    pub timestamp: f64,
    /// Wall-clock Unix timestamp.
    pub absolute_time: f64,
    pub username: String,
    pub nickname: String,
    pub content: String,
    pub event_type: ChatEventKind,
    /// Kind-specific extras (gift name/count).
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChatEvent {
    /// Copy of this event with its timestamp shifted by `offset` seconds,
    /// clamped at zero.
    pub fn with_offset(&self, offset: f64) -> Self {
        Self {
            timestamp: (self.timestamp - offset).max(0.0),
            ..self.clone()
        }
    }
}

/// State of one recorder unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecorderState {
    Checking,
    Monitoring,
    Recording,
    Encoding,
    Done,
    Error,
}

impl RecorderState {
    /// Whether this state ends the recorder unit.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// File layout and metadata for one live broadcast.
///
/// Owned by one recorder for the lifetime of one session; a fresh instance
/// (with fresh paths) is created each time the account goes live again.
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    pub account_id: String,
    pub room_id: Option<u64>,
    /// Wall-clock Unix timestamp of the video recording start.
    pub start_time: f64,
    pub output_dir: PathBuf,
    pub raw_video_path: PathBuf,
    pub chat_log_path: PathBuf,
    pub subtitle_path: PathBuf,
    pub final_video_path: PathBuf,
    pub quality: String,
    pub format: String,
}

impl RecordingSession {
    /// Fresh session for an account; output paths stay empty until the
    /// stream URL has been validated.
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            quality: "hd".to_string(),
            format: "flv".to_string(),
            ..Self::default()
        }
    }
}
