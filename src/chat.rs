//! Chat capture: adapts the live event feed into normalized, persisted
//! chat records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::client::LiveEvent;
use crate::config::Config;
use crate::error::Result;
use crate::models::{ChatEvent, ChatEventKind};
use crate::sink::{self, EventSink};
use crate::utils::unix_time;

/// Captures live chat events with timestamps relative to the recording
/// start, persisting each one as a JSON line.
pub struct ChatCapture {
    config: Config,
    log_path: PathBuf,
    sink: Arc<dyn EventSink>,
    events: Vec<ChatEvent>,
    start_time: Option<f64>,
    connected: bool,
    stream_ended: bool,
    log_file: Option<File>,
}

impl ChatCapture {
    pub fn new(config: Config, log_path: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            log_path: log_path.into(),
            sink,
            events: Vec::new(),
            start_time: None,
            connected: false,
            stream_ended: false,
            log_file: None,
        }
    }

    /// Open (truncating) the chat log file.
    pub async fn start(&mut self) -> Result<()> {
        self.log_file = Some(File::create(&self.log_path).await?);
        Ok(())
    }

    /// Flush and close the chat log. Safe to call multiple times.
    pub async fn stop(&mut self) {
        if let Some(mut file) = self.log_file.take() {
            let _ = file.flush().await;
        }
    }

    pub fn events(&self) -> &[ChatEvent] {
        &self.events
    }

    pub fn message_count(&self) -> usize {
        self.events.len()
    }

    /// Wall-clock time of the chat connection, once known.
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn stream_ended(&self) -> bool {
        self.stream_ended
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Process one event from the live feed.
    pub async fn handle_event(&mut self, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Connected { room_id } => {
                if self.start_time.is_none() {
                    self.start_time = Some(unix_time());
                }
                self.connected = true;
                info!(account = %self.config.account_id, ?room_id, "chat connected");
            }
            LiveEvent::Disconnected => {
                self.connected = false;
                info!("chat disconnected");
            }
            LiveEvent::LiveEnded => {
                self.stream_ended = true;
                info!("stream has ended");
            }
            LiveEvent::Comment {
                username,
                nickname,
                content,
            } => {
                let event = self.make_event(username, nickname, content, ChatEventKind::Comment);
                self.record(event).await?;
            }
            LiveEvent::Gift {
                username,
                nickname,
                gift_name,
                count,
                streak_final,
            } => {
                if !self.config.include_gifts {
                    return Ok(());
                }
                // Intermediate streak increments would double-count; only the
                // finalized total is recorded.
                if !streak_final {
                    return Ok(());
                }
                let mut event = self.make_event(
                    username,
                    nickname,
                    format!("sent {} x{}", gift_name, count),
                    ChatEventKind::Gift,
                );
                event.extra.insert("gift_name".to_string(), json!(gift_name));
                event.extra.insert("count".to_string(), json!(count));
                self.record(event).await?;
            }
            LiveEvent::Join { username, nickname } => {
                if !self.config.include_joins {
                    return Ok(());
                }
                let event =
                    self.make_event(username, nickname, "joined".to_string(), ChatEventKind::Join);
                self.record(event).await?;
            }
        }
        Ok(())
    }

    fn make_event(
        &mut self,
        username: String,
        nickname: String,
        content: String,
        kind: ChatEventKind,
    ) -> ChatEvent {
        let now = unix_time();
        let start = *self.start_time.get_or_insert(now);
        ChatEvent {
            timestamp: (now - start).max(0.0),
            absolute_time: now,
            username,
            nickname,
            content,
            event_type: kind,
            extra: Default::default(),
        }
    }

    /// Append an event to memory and to the log file (one JSON line, flushed
    /// immediately), then notify the sink.
    async fn record(&mut self, event: ChatEvent) -> Result<()> {
        if let Some(file) = self.log_file.as_mut() {
            let mut line = serde_json::to_string(&event)?;
            line.push('\n');
            if let Err(e) = file.write_all(line.as_bytes()).await {
                warn!(error = %e, "failed to append chat log line");
            } else {
                let _ = file.flush().await;
            }
        }
        sink::guard(|| self.sink.on_chat_message(&event));
        self.events.push(event);
        Ok(())
    }
}
