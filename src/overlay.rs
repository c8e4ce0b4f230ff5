//! Subtitle burn-in via an external encoder process. Cancellable.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::utils::normalize_path_for_ffmpeg;

const CANCEL_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Progress callback receiving one diagnostic line at a time.
pub type ProgressFn = dyn Fn(&str) + Send + Sync;

/// Burns a subtitle track into a recorded video, re-encoding video and
/// copying audio. One encode runs at a time; `cancel` aborts it.
pub struct OverlayEncoder {
    current: Mutex<Option<CancellationToken>>,
    running: AtomicBool,
}

impl OverlayEncoder {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Whether an encoder process is currently alive.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cancel the active encode, if any. Idempotent and thread-safe; a
    /// cancelled run returns `false` from [`burn_subtitles`].
    ///
    /// [`burn_subtitles`]: OverlayEncoder::burn_subtitles
    pub fn cancel(&self) {
        if let Some(token) = self.current.lock().as_ref() {
            token.cancel();
        }
    }

    /// Burn `subtitle_file` into `raw_video`, writing `output_file`.
    ///
    /// Diagnostic output is drained line-by-line and forwarded to
    /// `on_progress`; the pipe is never left unread. Returns `true` on a
    /// clean exit, `false` on failure or cancellation.
    pub async fn burn_subtitles(
        &self,
        raw_video: &Path,
        subtitle_file: &Path,
        output_file: &Path,
        config: &Config,
        on_progress: Option<&ProgressFn>,
    ) -> bool {
        let token = CancellationToken::new();
        *self.current.lock() = Some(token.clone());

        let sub_path = normalize_path_for_ffmpeg(&subtitle_file.to_string_lossy());
        let vf = format!("ass='{}'", sub_path);
        let input = raw_video.to_string_lossy();
        let output = output_file.to_string_lossy();

        let args = [
            "-y",
            "-loglevel",
            "error",
            "-i",
            &*input,
            "-vf",
            &*vf,
            "-c:a",
            "copy",
            "-c:v",
            "libx264",
            "-preset",
            "fast",
            "-crf",
            "23",
            "-stats",
            &*output,
        ];
        info!(ffmpeg = %config.ffmpeg_path, ?args, "burning subtitles");

        let spawned = Command::new(&config.ffmpeg_path)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                error!(ffmpeg = %config.ffmpeg_path, error = %e, "encoder not found");
                *self.current.lock() = None;
                return false;
            }
        };
        self.running.store(true, Ordering::SeqCst);

        let mut stderr_lines: Vec<String> = Vec::new();
        let mut cancelled = false;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim().to_string();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(on_progress) = on_progress {
                                on_progress(&line);
                            }
                            stderr_lines.push(line);
                        }
                        _ => break,
                    }
                }
            }
        }

        let status = if cancelled {
            info!("encode cancelled");
            let _ = child.start_kill();
            let _ = tokio::time::timeout(CANCEL_KILL_TIMEOUT, child.wait()).await;
            None
        } else {
            child.wait().await.ok()
        };

        self.running.store(false, Ordering::SeqCst);
        *self.current.lock() = None;

        if cancelled {
            return false;
        }
        match status {
            Some(status) if status.success() => true,
            Some(status) => {
                let tail = stderr_lines
                    .iter()
                    .rev()
                    .take(20)
                    .rev()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("\n");
                error!(code = ?status.code(), stderr = %tail, "subtitle burn failed");
                false
            }
            None => false,
        }
    }
}

impl Default for OverlayEncoder {
    fn default() -> Self {
        Self::new()
    }
}
