//! Recorder configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Screen corner the chat overlay is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CornerPosition {
    TopLeft,
    TopRight,
    #[default]
    BottomLeft,
    BottomRight,
}

impl CornerPosition {
    /// Whether the anchor sits on the left edge.
    pub fn is_left(self) -> bool {
        matches!(self, Self::TopLeft | Self::BottomLeft)
    }

    /// Whether stacking grows downward from the top edge.
    pub fn is_top(self) -> bool {
        matches!(self, Self::TopLeft | Self::TopRight)
    }
}

/// Configuration for one monitored account.
///
/// Passed by value into every component; the core never mutates it after a
/// session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account to monitor.
    pub account_id: String,
    /// Root directory for per-session output directories.
    pub output_dir: PathBuf,
    /// Requested stream quality (falls back through `origin/uhd/hd/sd/ld`).
    pub quality: String,
    /// Container format for the raw recording.
    pub format: String,
    /// Container format for the final overlay encode.
    pub output_format: String,
    /// Cap on the raw recording length in seconds, `-1` for unlimited.
    pub max_duration_secs: i64,
    /// Overlay font size.
    pub chat_font_size: u32,
    /// Maximum visible chat lines before slots are reused.
    pub chat_max_lines: usize,
    /// Seconds each chat line stays on screen.
    pub chat_display_duration: f64,
    /// Corner the overlay is anchored to.
    pub chat_position: CornerPosition,
    /// Horizontal margin in pixels.
    pub chat_margin_x: u32,
    /// Vertical margin in pixels.
    pub chat_margin_y: u32,
    /// Background opacity of chat lines, 0.0 (transparent) to 1.0 (opaque).
    pub chat_opacity: f64,
    /// Whether gift events are captured.
    pub include_gifts: bool,
    /// Whether join events are captured.
    pub include_joins: bool,
    /// Whether the overlay is burned into a final video after recording.
    pub overlay_enabled: bool,
    /// Capture chat only; no video recording.
    pub chat_only: bool,
    /// Path to the encoder binary.
    pub ffmpeg_path: String,
    /// Session token or full cookie string for authenticated connections.
    pub session_token: String,
    /// Minimum delay between liveness checks in seconds.
    pub rate_limit_delay_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_id: String::new(),
            output_dir: PathBuf::from("./recordings"),
            quality: "hd".to_string(),
            format: "flv".to_string(),
            output_format: "mp4".to_string(),
            max_duration_secs: -1,
            chat_font_size: 24,
            chat_max_lines: 8,
            chat_display_duration: 5.0,
            chat_position: CornerPosition::BottomLeft,
            chat_margin_x: 20,
            chat_margin_y: 50,
            chat_opacity: 0.6,
            include_gifts: true,
            include_joins: true,
            overlay_enabled: true,
            chat_only: false,
            ffmpeg_path: "ffmpeg".to_string(),
            session_token: String::new(),
            rate_limit_delay_secs: 10,
        }
    }
}

impl Config {
    /// Config for an account with all other settings at their defaults.
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.quality, "hd");
        assert_eq!(config.format, "flv");
        assert_eq!(config.max_duration_secs, -1);
        assert_eq!(config.chat_max_lines, 8);
        assert_eq!(config.chat_position, CornerPosition::BottomLeft);
        assert!(config.include_gifts);
    }

    #[test]
    fn test_corner_position_serde() {
        let json = serde_json::to_string(&CornerPosition::BottomLeft).unwrap();
        assert_eq!(json, "\"bottom-left\"");
        let pos: CornerPosition = serde_json::from_str("\"top-right\"").unwrap();
        assert_eq!(pos, CornerPosition::TopRight);
    }

    #[test]
    fn test_corner_position_axes() {
        assert!(CornerPosition::BottomLeft.is_left());
        assert!(!CornerPosition::BottomLeft.is_top());
        assert!(CornerPosition::TopRight.is_top());
        assert!(!CornerPosition::TopRight.is_left());
    }
}
