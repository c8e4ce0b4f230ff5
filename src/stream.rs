//! Stream URL resolution and the external recorder process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::utils::unix_time;

/// Quality fallback order, best first.
pub const QUALITY_FALLBACK_ORDER: [&str; 5] = ["origin", "uhd", "hd", "sd", "ld"];

const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// A playable stream URL together with the quality that was actually used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub url: String,
    pub quality: String,
}

impl ResolvedStream {
    /// Whether the resolver had to fall back from the requested quality.
    pub fn is_downgrade(&self, requested: &str) -> bool {
        self.quality != requested
    }
}

/// Extract the livestream URL from broadcast metadata.
///
/// The metadata nests a JSON string at
/// `stream_url.live_core_sdk_data.pull_data.stream_data` whose `data` object
/// maps quality → `main` → container format → URL. Candidates are tried in
/// the order `[requested] + fallback order minus requested`; within a
/// quality, `flv` is the container fallback.
pub fn extract_stream_url(room_info: &Value, quality: &str, format: &str) -> Result<ResolvedStream> {
    let stream_data_json = room_info
        .pointer("/stream_url/live_core_sdk_data/pull_data/stream_data")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::StreamUnavailable {
            requested: quality.to_string(),
            available: Vec::new(),
        })?;
    let stream_data: Value = serde_json::from_str(stream_data_json)?;

    let Some(available) = stream_data.get("data").and_then(Value::as_object) else {
        return Err(Error::StreamUnavailable {
            requested: quality.to_string(),
            available: Vec::new(),
        });
    };

    let candidates = std::iter::once(quality).chain(
        QUALITY_FALLBACK_ORDER
            .iter()
            .copied()
            .filter(|q| *q != quality),
    );

    for candidate in candidates {
        let Some(main) = available.get(candidate).and_then(|v| v.get("main")) else {
            continue;
        };
        let url = main
            .get(format)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                main.get("flv")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
            });
        if let Some(url) = url {
            if candidate != quality {
                warn!(
                    requested = quality,
                    actual = candidate,
                    "requested quality unavailable, falling back"
                );
            }
            return Ok(ResolvedStream {
                url: url.to_string(),
                quality: candidate.to_string(),
            });
        }
    }

    Err(Error::StreamUnavailable {
        requested: quality.to_string(),
        available: available.keys().cloned().collect(),
    })
}

/// Manages one external encoder process that copies a stream to a file
/// without re-encoding.
pub struct StreamRecorder {
    stream_url: String,
    output_path: PathBuf,
    ffmpeg_path: String,
    max_duration_secs: i64,
    child: Option<Child>,
    start_time: f64,
}

impl StreamRecorder {
    pub fn new(stream_url: impl Into<String>, output_path: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            stream_url: stream_url.into(),
            output_path: output_path.into(),
            ffmpeg_path: config.ffmpeg_path.clone(),
            max_duration_secs: config.max_duration_secs,
            child: None,
            start_time: 0.0,
        }
    }

    /// Wall-clock Unix timestamp of when the process was started.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Whether the recorder process is still running.
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-i".to_string(),
            self.stream_url.clone(),
            "-c".to_string(),
            "copy".to_string(),
        ];
        if self.max_duration_secs > 0 {
            args.extend(["-t".to_string(), self.max_duration_secs.to_string()]);
        }
        args.push(self.output_path.to_string_lossy().to_string());
        args
    }

    /// Spawn the recorder process.
    pub fn start(&mut self) -> Result<()> {
        let args = self.build_args();
        info!(ffmpeg = %self.ffmpeg_path, ?args, "starting stream recorder");

        let child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::process(format!("failed to spawn recorder: {}", e)))?;

        self.child = Some(child);
        self.start_time = unix_time();
        Ok(())
    }

    /// Stop the recorder process: graceful terminate, 10s wait, then kill
    /// with a further 5s wait. Returns drained stderr output, if any.
    ///
    /// The error stream is drained concurrently with the wait; a full pipe
    /// buffer must never wedge the external process.
    pub async fn stop(&mut self) -> Result<Option<String>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };

        let mut stderr = child.stderr.take();
        let drain = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = match child.try_wait()? {
            Some(status) => status,
            None => {
                terminate(&child);
                match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!("recorder did not exit after terminate, killing");
                        let _ = child.start_kill();
                        tokio::time::timeout(KILL_TIMEOUT, child.wait())
                            .await
                            .map_err(|_| Error::process("recorder did not exit after kill"))??
                    }
                }
            }
        };

        let stderr_text = drain.await.unwrap_or_default();

        if !is_normal_exit(&status) {
            warn!(code = ?status.code(), stderr = %stderr_text.trim(), "recorder exited abnormally");
        } else {
            debug!(code = ?status.code(), "recorder stopped");
        }

        Ok((!stderr_text.is_empty()).then_some(stderr_text))
    }
}

/// Request graceful termination of a child process.
fn terminate(child: &Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        return;
    }
    #[cfg(not(unix))]
    {
        // No graceful signal available; the caller escalates to kill.
        let _ = child;
    }
}

/// Exit statuses treated as a normal end of recording.
///
/// 0 is a clean exit, 255 is the encoder's stream-end code, SIGTERM is our
/// own stop request, and Windows reports 1 for a terminated process.
fn is_normal_exit(status: &std::process::ExitStatus) -> bool {
    if status.success() || status.code() == Some(255) {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(libc::SIGTERM) {
            return true;
        }
    }
    #[cfg(windows)]
    {
        if status.code() == Some(1) {
            return true;
        }
    }
    false
}

/// Whether a recorded file exists and holds at least one byte.
pub fn has_output(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
