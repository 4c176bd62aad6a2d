//! Timecode and bitrate parsing shared by validation and progress parsing.

use std::sync::LazyLock;

use regex::Regex;

static TIMECODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):([0-5]\d):([0-5]\d(?:\.\d+)?)$").unwrap());

static SECONDS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?$").unwrap());

static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)?[kKmM]?$").unwrap());

/// Parse an `HH:MM:SS[.ms]` timecode into seconds.
pub fn parse_timecode(s: &str) -> Option<f64> {
    let caps = TIMECODE_RE.captures(s.trim())?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse a timestamp given either as `HH:MM:SS[.ms]` or plain seconds.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let s = s.trim();
    if SECONDS_RE.is_match(s) {
        return s.parse().ok();
    }
    parse_timecode(s)
}

/// Whether `s` is an accepted timestamp (`HH:MM:SS[.ms]` or seconds).
pub fn is_timestamp(s: &str) -> bool {
    parse_timestamp(s).is_some()
}

/// Whether `s` is an accepted bitrate (`800k`, `1.5M`, `128000`).
pub fn is_bitrate(s: &str) -> bool {
    BITRATE_RE.is_match(s.trim())
}

/// Format seconds as `HH:MM:SS.mmm` for ffmpeg arguments.
pub fn format_timecode(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
