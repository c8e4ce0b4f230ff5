//! Small helpers shared across the crate: ASS time/escape formatting,
//! path normalization for ffmpeg filter arguments, and the encoder probe.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Format seconds as ASS timestamp `H:MM:SS.CC`.
pub fn seconds_to_ass_time(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let h = (seconds / 3600.0) as u64;
    let m = ((seconds % 3600.0) / 60.0) as u64;
    let s = (seconds % 60.0) as u64;
    let cs = ((seconds % 1.0) * 100.0) as u64;
    format!("{}:{:02}:{:02}.{:02}", h, m, s, cs)
}

/// Escape ASS reserved characters: backslash, braces, and line breaks.
pub fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('\n', "\\N")
}

/// Normalize a path for use inside an ffmpeg filter argument.
///
/// Backslashes become forward slashes and a drive-letter colon is escaped,
/// since `:` separates options in filter chains.
pub fn normalize_path_for_ffmpeg(path: &str) -> String {
    let path = path.replace('\\', "/");
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        format!("{}\\:{}", &path[..1], &path[2..])
    } else {
        path
    }
}

/// Replace filesystem-reserved characters with `_` and trim whitespace.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Format a duration in seconds as `H:MM:SS` (or `M:SS` under an hour).
pub fn format_duration(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let h = (seconds / 3600.0) as u64;
    let m = ((seconds % 3600.0) / 60.0) as u64;
    let s = (seconds % 60.0) as u64;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Probe for a working encoder binary by running `<path> -version`.
///
/// Returns the path if the probe exits successfully.
pub fn find_ffmpeg(ffmpeg_path: &str) -> Option<String> {
    std::process::Command::new(ffmpeg_path)
        .arg("-version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|_| ffmpeg_path.to_string())
}
