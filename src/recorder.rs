//! The recorder state machine: liveness monitoring, session recording, and
//! post-processing for one monitored account.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chat::ChatCapture;
use crate::client::{ClientError, ClientInit, LiveClient, LiveClientFactory, LiveEvent};
use crate::config::Config;
use crate::error::Result;
use crate::models::{RecorderState, RecordingSession};
use crate::overlay::{OverlayEncoder, ProgressFn};
use crate::rate_limiter::RateLimiter;
use crate::sink::{self, EventSink};
use crate::stream::{ResolvedStream, StreamRecorder, extract_stream_url, has_output};
use crate::subtitle::SubtitleGenerator;
use crate::utils::{find_ffmpeg, format_duration, sanitize_filename, unix_time};

const MAX_NOT_FOUND: u32 = 3;
const MAX_CHAT_RECONNECTS: u32 = 5;
const CHAT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const SUPERVISION_TICK: Duration = Duration::from_millis(500);

const MAX_CONSECUTIVE_FAILURES: u32 = 5;
const RETRY_BACKOFF_INITIAL: Duration = Duration::from_secs(10);
const RETRY_BACKOFF_CAP: Duration = Duration::from_secs(120);

const VIDEO_WIDTH: u32 = 1920;
const VIDEO_HEIGHT: u32 = 1080;

/// Remote control for a running [`Recorder`].
#[derive(Clone)]
pub struct RecorderHandle {
    stop: CancellationToken,
    encoder: Arc<OverlayEncoder>,
}

impl RecorderHandle {
    /// Request a cooperative stop. Aborts any in-flight overlay encode.
    pub fn request_stop(&self) {
        self.stop.cancel();
        if self.encoder.is_running() {
            self.encoder.cancel();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Orchestrates detection, recording, and post-processing for one account.
///
/// One instance per monitored account; instances share only the
/// [`RateLimiter`].
pub struct Recorder {
    config: Config,
    factory: Arc<dyn LiveClientFactory>,
    sink: Arc<dyn EventSink>,
    rate_limiter: Arc<RateLimiter>,
    init: ClientInit,
    session: RecordingSession,
    state: RecorderState,
    stop: CancellationToken,
    encoder: Arc<OverlayEncoder>,
}

impl Recorder {
    pub fn new(
        config: Config,
        factory: Arc<dyn LiveClientFactory>,
        sink: Arc<dyn EventSink>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let init = ClientInit::parse_session(&config.session_token);
        let session = RecordingSession::new(&config.account_id);
        Self {
            config,
            factory,
            sink,
            rate_limiter,
            init,
            session,
            state: RecorderState::Checking,
            stop: CancellationToken::new(),
            encoder: Arc::new(OverlayEncoder::new()),
        }
    }

    /// Control handle usable from other tasks.
    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            stop: self.stop.clone(),
            encoder: Arc::clone(&self.encoder),
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn session(&self) -> &RecordingSession {
        &self.session
    }

    /// Run the recorder to completion, restarting the whole cycle with
    /// exponential backoff on unexpected failures.
    ///
    /// Never returns an error: terminal outcomes are reported through the
    /// status sink as `Done` or `Error`.
    pub async fn run(&mut self) {
        let mut consecutive_failures = 0u32;
        let mut backoff = RETRY_BACKOFF_INITIAL;

        loop {
            match self.run_once().await {
                Ok(()) => break,
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        account = %self.config.account_id,
                        error = %e,
                        attempt = consecutive_failures,
                        max = MAX_CONSECUTIVE_FAILURES,
                        "recorder cycle failed"
                    );
                    sink::guard(|| {
                        self.sink
                            .on_log(&format!("recorder cycle failed, retrying: {}", e))
                    });
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        self.set_state(RecorderState::Error);
                        break;
                    }
                    if self.wait_or_stop(backoff).await {
                        self.set_state(RecorderState::Done);
                        break;
                    }
                    backoff = backoff.mul_f64(1.5).min(RETRY_BACKOFF_CAP);
                }
            }
        }
    }

    /// One full monitoring cycle: check liveness until the account goes live,
    /// record the session, repeat until stopped or a fatal condition.
    async fn run_once(&mut self) -> Result<()> {
        self.set_state(RecorderState::Checking);

        // Precondition: a usable encoder binary, unless chat-only.
        if !self.config.chat_only {
            match find_ffmpeg(&self.config.ffmpeg_path) {
                Some(path) => self.config.ffmpeg_path = path,
                None => {
                    error!(path = %self.config.ffmpeg_path, "no usable encoder binary found");
                    sink::guard(|| self.sink.on_log("encoder binary not found"));
                    self.set_state(RecorderState::Error);
                    return Ok(());
                }
            }
        }

        info!(account = %self.config.account_id, "monitoring account");

        let mut client = self.factory.create(&self.config.account_id, &self.init);
        let mut not_found_count = 0u32;
        let mut first_check = true;

        while !self.stop.is_cancelled() {
            if first_check {
                first_check = false;
            } else {
                self.set_state(RecorderState::Monitoring);
            }

            tokio::select! {
                _ = self.stop.cancelled() => break,
                _ = self.rate_limiter.acquire_for(&self.config.account_id) => {}
            }
            if self.stop.is_cancelled() {
                break;
            }

            debug!(account = %self.config.account_id, "checking liveness");
            let is_live = match client.is_live().await {
                Ok(is_live) => is_live,
                Err(ClientError::UserNotFound) => {
                    not_found_count += 1;
                    if not_found_count >= MAX_NOT_FOUND {
                        error!(
                            account = %self.config.account_id,
                            checks = not_found_count,
                            "account not found after consecutive checks, giving up"
                        );
                        client.close().await;
                        self.set_state(RecorderState::Error);
                        return Ok(());
                    }
                    warn!(
                        account = %self.config.account_id,
                        attempt = not_found_count,
                        max = MAX_NOT_FOUND,
                        "account not found, retrying"
                    );
                    client.close().await;
                    client = self.factory.create(&self.config.account_id, &self.init);
                    self.wait_or_stop(self.check_delay()).await;
                    continue;
                }
                Err(ClientError::RateLimited { retry_after_secs }) => {
                    warn!(retry_after_secs, "rate limited by service, waiting");
                    self.wait_or_stop(Duration::from_secs(retry_after_secs)).await;
                    continue;
                }
                Err(ClientError::Transient(e)) => {
                    warn!(error = %e, "liveness check failed, recreating client");
                    client.close().await;
                    client = self.factory.create(&self.config.account_id, &self.init);
                    self.wait_or_stop(self.check_delay()).await;
                    continue;
                }
            };
            not_found_count = 0;

            if !is_live {
                debug!(account = %self.config.account_id, "not live");
                self.set_state(RecorderState::Monitoring);
                self.wait_or_stop(self.check_delay()).await;
                continue;
            }

            info!(account = %self.config.account_id, "account is live");
            self.record_session(&mut client).await?;

            if !self.stop.is_cancelled() {
                info!("recording ended, returning to monitoring");
                self.session = RecordingSession::new(&self.config.account_id);
                client = self.factory.create(&self.config.account_id, &self.init);
            }
        }

        client.close().await;
        self.set_state(RecorderState::Done);
        Ok(())
    }

    /// One recording session while the account is confirmed live.
    async fn record_session(&mut self, client: &mut Arc<dyn LiveClient>) -> Result<()> {
        // Phase 1: validate everything before touching the filesystem. A
        // failed resolution must never leave an empty directory behind.
        tokio::select! {
            _ = self.stop.cancelled() => return Ok(()),
            _ = self.rate_limiter.acquire_for(&self.config.account_id) => {}
        }

        let feed = match client.subscribe().await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!(error = %e, "failed to open live event feed, skipping cycle");
                client.close().await;
                return Ok(());
            }
        };
        self.session.room_id = client.room_id();

        let resolved = if self.config.chat_only {
            None
        } else {
            let room_info = match client.room_info().await {
                Ok(info) => info,
                Err(e) => {
                    warn!(error = %e, "failed to fetch broadcast metadata, skipping cycle");
                    client.close().await;
                    return Ok(());
                }
            };
            match extract_stream_url(&room_info, &self.config.quality, &self.config.format) {
                Ok(resolved) => Some(resolved),
                Err(e) => {
                    warn!(error = %e, "failed to resolve stream url, skipping cycle");
                    client.close().await;
                    return Ok(());
                }
            }
        };

        // Phase 2: validation passed, materialize the session on disk.
        self.setup_output_dir()?;
        info!(dir = %self.session.output_dir.display(), "session output directory");

        let mut chat = ChatCapture::new(
            self.config.clone(),
            self.session.chat_log_path.clone(),
            Arc::clone(&self.sink),
        );
        let mut recorder = None;

        // From here on the session directory exists, so teardown and
        // post-processing must run no matter how startup or supervision end.
        let result = self
            .supervise_session(client, &mut chat, &mut recorder, feed, resolved)
            .await;

        // The overlay encode must not start until the recorder process has
        // fully stopped.
        if let Some(recorder) = recorder.as_mut() {
            match recorder.stop().await {
                Ok(Some(stderr)) => debug!(stderr = %stderr.trim(), "recorder diagnostics"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "error stopping recorder process"),
            }
        }
        chat.stop().await;
        client.close().await;

        if let Err(e) = self.post_process(&chat, recorder.is_some()).await {
            warn!(error = %e, "post-processing failed");
        }
        result
    }

    /// Start the session's chat capture and recorder process, then supervise
    /// until the session ends. The caller owns teardown.
    async fn supervise_session(
        &mut self,
        client: &mut Arc<dyn LiveClient>,
        chat: &mut ChatCapture,
        recorder: &mut Option<StreamRecorder>,
        mut feed: Option<mpsc::Receiver<LiveEvent>>,
        resolved: Option<ResolvedStream>,
    ) -> Result<()> {
        chat.start().await?;

        match resolved {
            Some(resolved) => {
                self.session.quality = resolved.quality.clone();
                sink::guard(|| self.sink.on_stream_url(&resolved.url));
                let mut stream_recorder = StreamRecorder::new(
                    resolved.url,
                    self.session.raw_video_path.clone(),
                    &self.config,
                );
                stream_recorder.start()?;
                info!(quality = %resolved.quality, "recording video and capturing chat");
                *recorder = Some(stream_recorder);
            }
            None => {
                info!("capturing chat only, no video recording");
            }
        }

        self.set_state(RecorderState::Recording);
        self.session.start_time = recorder
            .as_ref()
            .map(StreamRecorder::start_time)
            .unwrap_or_else(unix_time);

        let mut reconnect_attempts = 0u32;
        let mut chat_given_up = false;
        let mut tick = tokio::time::interval(SUPERVISION_TICK);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                event = next_event(&mut feed) => match event {
                    Some(event) => {
                        if let Err(e) = chat.handle_event(event).await {
                            warn!(error = %e, "failed to record chat event");
                        }
                    }
                    None => {
                        feed = None;
                    }
                },
                _ = tick.tick() => {
                    if let Some(recorder) = recorder.as_mut() {
                        if !recorder.is_alive() {
                            info!("stream ended, recorder process exited");
                            break;
                        }
                    }
                    if feed.is_none() && !chat_given_up {
                        if recorder.is_none() {
                            // Chat-only session ends with its feed.
                            info!("live event feed closed");
                            break;
                        }
                        if reconnect_attempts < MAX_CHAT_RECONNECTS {
                            reconnect_attempts += 1;
                            info!(
                                attempt = reconnect_attempts,
                                max = MAX_CHAT_RECONNECTS,
                                "chat disconnected, reconnecting"
                            );
                            if self.wait_or_stop(CHAT_RECONNECT_DELAY).await {
                                break;
                            }
                            *client = self.factory.create(&self.config.account_id, &self.init);
                            match client.subscribe().await {
                                Ok(new_feed) => {
                                    info!("chat reconnected");
                                    feed = Some(new_feed);
                                    reconnect_attempts = 0;
                                }
                                Err(e) => warn!(error = %e, "chat reconnect failed"),
                            }
                        } else {
                            warn!("chat reconnect limit reached, video continues without chat");
                            chat_given_up = true;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Post-processing after a session ends: overlay burn (or subtitle-only
    /// output), then empty-directory cleanup.
    async fn post_process(&mut self, chat: &ChatCapture, had_recorder: bool) -> Result<()> {
        let duration = unix_time() - self.session.start_time;
        info!(
            duration = %format_duration(duration),
            chat_messages = chat.message_count(),
            "recording complete"
        );

        let has_video = had_recorder && has_output(&self.session.raw_video_path);
        let has_chat = chat.message_count() > 0;

        if has_chat
            && has_video
            && self.config.overlay_enabled
            && !self.stop.is_cancelled()
        {
            self.set_state(RecorderState::Encoding);

            // Chat timestamps are relative to the chat connection, which can
            // differ from the video start; rebase them onto the video clock.
            let time_offset =
                chat.start_time().unwrap_or(self.session.start_time) - self.session.start_time;
            let adjusted: Vec<_> = chat
                .events()
                .iter()
                .map(|event| event.with_offset(time_offset))
                .collect();

            let generator = SubtitleGenerator::new(self.config.clone());
            generator.write(&adjusted, &self.session.subtitle_path, VIDEO_WIDTH, VIDEO_HEIGHT)?;

            info!("encoding final video with chat overlay");
            let sink = Arc::clone(&self.sink);
            let progress = move |line: &str| sink::guard(|| sink.on_log(line));
            let success = self
                .encoder
                .burn_subtitles(
                    &self.session.raw_video_path,
                    &self.session.subtitle_path,
                    &self.session.final_video_path,
                    &self.config,
                    Some(&progress as &ProgressFn),
                )
                .await;
            if success {
                info!(path = %self.session.final_video_path.display(), "final video written");
            } else {
                // Non-fatal: the raw video and subtitle track stay on disk.
                warn!("overlay encode failed or cancelled, raw video and subtitles preserved");
            }
        } else if has_chat && !has_video {
            let generator = SubtitleGenerator::new(self.config.clone());
            generator.write(
                chat.events(),
                &self.session.subtitle_path,
                VIDEO_WIDTH,
                VIDEO_HEIGHT,
            )?;
            info!("chat-only session, subtitle track saved for later use");
        }

        if !has_video && !has_chat {
            cleanup_empty_dir(&self.session.output_dir);
        }
        Ok(())
    }

    /// Create the per-session output directory and derive its file paths.
    fn setup_output_dir(&mut self) -> Result<()> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dirname = format!("{}_{}", sanitize_filename(&self.config.account_id), timestamp);
        let dir = self.config.output_dir.join(dirname);
        std::fs::create_dir_all(&dir)?;

        self.session.raw_video_path = dir.join(format!("raw_video.{}", self.config.format));
        self.session.chat_log_path = dir.join("chat_log.jsonl");
        self.session.subtitle_path = dir.join("overlay.ass");
        self.session.final_video_path =
            dir.join(format!("final_output.{}", self.config.output_format));
        self.session.format = self.config.format.clone();
        self.session.output_dir = dir;
        Ok(())
    }

    fn check_delay(&self) -> Duration {
        Duration::from_secs(self.config.rate_limit_delay_secs)
    }

    fn set_state(&mut self, state: RecorderState) {
        if self.state != state {
            info!(account = %self.config.account_id, %state, "state changed");
        }
        self.state = state;
        sink::guard(|| self.sink.on_status(state));
    }

    /// Sleep for `duration` or until a stop is requested. Returns whether a
    /// stop was requested.
    async fn wait_or_stop(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.stop.cancelled() => true,
            _ = tokio::time::sleep(duration) => self.stop.is_cancelled(),
        }
    }
}

/// Next event from an optional feed; an absent feed never yields.
async fn next_event(feed: &mut Option<mpsc::Receiver<LiveEvent>>) -> Option<LiveEvent> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

/// Remove an output directory if it holds only empty files.
fn cleanup_empty_dir(dir: &Path) {
    if !dir.is_dir() {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut files = Vec::new();
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            return;
        };
        if meta.is_dir() || meta.len() > 0 {
            return;
        }
        files.push(entry.path());
    }
    for file in files {
        let _ = std::fs::remove_file(file);
    }
    if std::fs::remove_dir(dir).is_ok() {
        info!(dir = %dir.display(), "removed empty output directory");
    }
}
