//! ASS subtitle generation from captured chat.
//!
//! Pure text computation: timing, vertical stacking, corner-anchored
//! positioning, and per-user colors. No I/O beyond [`SubtitleGenerator::write`].

use std::hash::{Hash, Hasher};
use std::path::Path;

use rustc_hash::FxHasher;

use crate::config::Config;
use crate::error::Result;
use crate::models::{ChatEvent, ChatEventKind};
use crate::utils::{escape_ass_text, seconds_to_ass_time};

/// Username color palette, cycled by hash for visual variety.
const USERNAME_COLORS: [&str; 8] = [
    "&H0088FF00", // green
    "&H00FFFF00", // cyan
    "&H0000FFFF", // yellow
    "&H00FF88FF", // pink
    "&H00FFAA00", // teal
    "&H008888FF", // light orange
    "&H00FF00FF", // magenta
    "&H0000AAFF", // orange
];

const GIFT_COLOR: &str = "&H0000FFFF";
const JOIN_COLOR: &str = "&H00888888";

/// Generates a styled ASS subtitle track from chat events.
pub struct SubtitleGenerator {
    config: Config,
}

impl SubtitleGenerator {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Generate the complete subtitle track for `messages` in arrival order.
    pub fn generate(&self, messages: &[ChatEvent], video_width: u32, video_height: u32) -> String {
        let mut out = self.build_header(video_width, video_height);
        let duration = self.config.chat_display_duration;

        for (i, msg) in messages.iter().enumerate() {
            let start = msg.timestamp;
            let end = start + duration;

            let slot = stack_slot(messages, i, duration, self.config.chat_max_lines);
            let (x, y) = self.position(slot, video_width, video_height);

            let style = if msg.event_type == ChatEventKind::Gift {
                "GiftBox"
            } else {
                "ChatBox"
            };
            let alignment = if self.config.chat_position.is_left() {
                "\\an7"
            } else {
                "\\an9"
            };

            out.push_str(&format!(
                "Dialogue: 0,{},{},{},,0,0,0,,{{{}\\pos({},{})\\fad(200,500)}}{}\n",
                seconds_to_ass_time(start),
                seconds_to_ass_time(end),
                style,
                alignment,
                x,
                y,
                format_message(msg),
            ));
        }

        out
    }

    /// Generate and write the subtitle track to `output_path`.
    pub fn write(
        &self,
        messages: &[ChatEvent],
        output_path: &Path,
        video_width: u32,
        video_height: u32,
    ) -> Result<()> {
        let content = self.generate(messages, video_width, video_height);
        std::fs::write(output_path, content)?;
        Ok(())
    }

    fn build_header(&self, video_width: u32, video_height: u32) -> String {
        let bg_alpha = opacity_to_ass_alpha(self.config.chat_opacity);
        let font_size = self.config.chat_font_size;
        let mx = self.config.chat_margin_x;
        let my = self.config.chat_margin_y;

        format!(
            "[Script Info]\n\
             Title: Live Chat Overlay\n\
             ScriptType: v4.00+\n\
             PlayResX: {video_width}\n\
             PlayResY: {video_height}\n\
             WrapStyle: 0\n\
             ScaledBorderAndShadow: yes\n\
             \n\
             [V4+ Styles]\n\
             Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, \
             Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
             BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n\
             Style: ChatBox,Segoe UI,{font_size},&H00FFFFFF,&H000000FF,&H00000000,&H{bg_alpha}000000,\
             0,0,0,0,100,100,0,0,3,2,0,7,{mx},{mx},{my},1\n\
             Style: GiftBox,Segoe UI,{font_size},&H0000FFFF,&H000000FF,&H00000000,&H{bg_alpha}000000,\
             1,0,0,0,100,100,0,0,3,2,0,7,{mx},{mx},{my},1\n\
             \n\
             [Events]\n\
             Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n"
        )
    }

    /// Screen position for a message at the given slot (slot 0 is nearest the
    /// anchored corner).
    fn position(&self, slot: usize, video_width: u32, video_height: u32) -> (i64, i64) {
        let line_height = (self.config.chat_font_size + 8) as i64;
        let margin_x = self.config.chat_margin_x as i64;
        let margin_y = self.config.chat_margin_y as i64;
        let slot = slot as i64;

        let x = if self.config.chat_position.is_left() {
            margin_x
        } else {
            video_width as i64 - margin_x
        };
        let y = if self.config.chat_position.is_top() {
            margin_y + slot * line_height
        } else {
            video_height as i64 - margin_y - slot * line_height
        };

        (x, y)
    }
}

/// Vertical slot for message `i`: the number of earlier messages whose
/// display window still overlaps this message's start, capped at
/// `max_lines - 1` so late messages reuse the last slot.
pub(crate) fn stack_slot(
    messages: &[ChatEvent],
    i: usize,
    duration: f64,
    max_lines: usize,
) -> usize {
    let start = messages[i].timestamp;
    let visible = messages[..i]
        .iter()
        .filter(|m| m.timestamp + duration > start)
        .count();
    visible.min(max_lines.saturating_sub(1))
}

/// Deterministic palette color for a username. Stable across sessions.
fn username_color(username: &str) -> &'static str {
    let mut hasher = FxHasher::default();
    username.hash(&mut hasher);
    USERNAME_COLORS[(hasher.finish() as usize) % USERNAME_COLORS.len()]
}

/// Convert 0.0..=1.0 opacity to ASS alpha hex (00 opaque, FF transparent).
fn opacity_to_ass_alpha(opacity: f64) -> String {
    let alpha = ((1.0 - opacity.clamp(0.0, 1.0)) * 255.0).round() as u8;
    format!("{:02X}", alpha)
}

fn format_message(msg: &ChatEvent) -> String {
    let username = escape_ass_text(&msg.username);
    match msg.event_type {
        ChatEventKind::Comment => {
            let color = username_color(&msg.username);
            let content = escape_ass_text(&msg.content);
            format!("{{\\b1\\1c{color}}}@{username} {{\\b0\\1c&H00FFFFFF&}}{content}")
        }
        ChatEventKind::Gift => {
            let content = escape_ass_text(&msg.content);
            format!("{{\\b1\\1c{GIFT_COLOR}}}@{username} {{\\b0}}{content}")
        }
        ChatEventKind::Join => {
            format!("{{\\1c{JOIN_COLOR}}}@{username} joined")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(t: f64, username: &str, content: &str, kind: ChatEventKind) -> ChatEvent {
        ChatEvent {
            timestamp: t,
            absolute_time: 1_700_000_000.0 + t,
            username: username.to_string(),
            nickname: username.to_string(),
            content: content.to_string(),
            event_type: kind,
            extra: Default::default(),
        }
    }

    fn comment(t: f64, username: &str, content: &str) -> ChatEvent {
        message(t, username, content, ChatEventKind::Comment)
    }

    #[test]
    fn test_stacking_overlapping_then_reset() {
        let messages = vec![
            comment(0.0, "a", "one"),
            comment(1.0, "b", "two"),
            comment(2.0, "c", "three"),
            comment(10.0, "d", "four"),
        ];
        // First three mutually overlap at 5s display duration; the fourth
        // starts after all have expired.
        assert_eq!(stack_slot(&messages, 0, 5.0, 8), 0);
        assert_eq!(stack_slot(&messages, 1, 5.0, 8), 1);
        assert_eq!(stack_slot(&messages, 2, 5.0, 8), 2);
        assert_eq!(stack_slot(&messages, 3, 5.0, 8), 0);
    }

    #[test]
    fn test_stacking_capped_at_max_lines() {
        let messages: Vec<ChatEvent> = (0..6)
            .map(|i| comment(i as f64 * 0.1, "u", "hi"))
            .collect();
        assert_eq!(stack_slot(&messages, 5, 5.0, 3), 2);
    }

    #[test]
    fn test_reserved_characters_escaped() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let messages = vec![comment(0.0, "user", "a\\b {c} d\ne")];
        let out = generator.generate(&messages, 1920, 1080);

        let cue = out.lines().find(|l| l.starts_with("Dialogue:")).unwrap();
        assert!(cue.contains("a\\\\b \\{c\\} d\\Ne"));
        assert!(!cue.contains('\n'));
    }

    #[test]
    fn test_gift_uses_gift_style() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let messages = vec![message(1.0, "bob", "sent Rose x3", ChatEventKind::Gift)];
        let out = generator.generate(&messages, 1920, 1080);
        assert!(out.contains(",GiftBox,"));
        assert!(out.contains(GIFT_COLOR));
    }

    #[test]
    fn test_join_renders_muted_suffix() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let messages = vec![message(1.0, "carol", "joined", ChatEventKind::Join)];
        let out = generator.generate(&messages, 1920, 1080);
        assert!(out.contains("@carol joined"));
        assert!(out.contains(JOIN_COLOR));
    }

    #[test]
    fn test_empty_messages_is_header_only() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let out = generator.generate(&[], 1920, 1080);
        assert!(out.contains("[Script Info]"));
        assert!(out.contains("PlayResX: 1920"));
        assert!(!out.contains("Dialogue:"));
    }

    #[test]
    fn test_username_color_deterministic() {
        let first = username_color("streamer_fan_42");
        let second = username_color("streamer_fan_42");
        assert_eq!(first, second);
        assert!(USERNAME_COLORS.contains(&first));
    }

    #[test]
    fn test_opacity_alpha_conversion() {
        assert_eq!(opacity_to_ass_alpha(1.0), "00");
        assert_eq!(opacity_to_ass_alpha(0.0), "FF");
        assert_eq!(opacity_to_ass_alpha(0.6), "66");
        assert_eq!(opacity_to_ass_alpha(2.0), "00");
    }

    #[test]
    fn test_bottom_left_positions_decrease_upward() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let (x0, y0) = generator.position(0, 1920, 1080);
        let (_, y1) = generator.position(1, 1920, 1080);
        assert_eq!(x0, 20);
        assert_eq!(y0, 1080 - 50);
        assert_eq!(y1, y0 - (24 + 8));
    }

    #[test]
    fn test_top_right_anchor_and_alignment() {
        let mut config = Config::for_account("streamer");
        config.chat_position = crate::config::CornerPosition::TopRight;
        let generator = SubtitleGenerator::new(config);
        let (x, y) = generator.position(0, 1920, 1080);
        assert_eq!(x, 1920 - 20);
        assert_eq!(y, 50);

        let messages = vec![comment(0.0, "a", "hi")];
        let out = generator.generate(&messages, 1920, 1080);
        assert!(out.contains("\\an9"));
    }

    #[test]
    fn test_cue_timing_uses_display_duration() {
        let config = Config::for_account("streamer");
        let generator = SubtitleGenerator::new(config);
        let messages = vec![comment(65.5, "a", "hi")];
        let out = generator.generate(&messages, 1920, 1080);
        assert!(out.contains("Dialogue: 0,0:01:05.50,0:01:10.50,ChatBox,"));
        assert!(out.contains("\\fad(200,500)"));
    }
}
