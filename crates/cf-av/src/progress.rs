//! Progress derivation from ffmpeg diagnostic output.
//!
//! ffmpeg reports status lines such as
//! `frame=  240 fps= 48 q=28.0 size=  1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.9x`.
//! [`parse_line`] extracts the four fields of interest independently;
//! [`ProgressTracker`] turns them into throttled [`ProgressSample`]s.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use cf_core::timecode::parse_timecode;

static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"frame=\s*(\d+)").unwrap());
static FPS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fps=\s*(\d+(?:\.\d+)?)").unwrap());
static BITRATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bitrate=\s*(\d+(?:\.\d+)?)\s*kbits/s").unwrap());
static TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time=\s*(\d{2,}:\d{2}:\d{2}(?:\.\d+)?)").unwrap());

/// Minimum advance, in percentage points, between two emitted samples.
pub const EMIT_STEP: f64 = 1.0;

/// Raw fields found on one diagnostic line. Each is optional on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticFields {
    pub frames: Option<u64>,
    pub fps: Option<f64>,
    pub kbps: Option<f64>,
    pub timecode: Option<String>,
}

/// A normalized progress report for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Percent complete, 0–100.
    pub percent: f64,
    /// Frames processed so far.
    pub frames: Option<u64>,
    /// Instantaneous encode rate.
    pub fps: Option<f64>,
    /// Instantaneous output bitrate in kbit/s.
    pub kbps: Option<f64>,
    /// Source timecode the percentage was derived from.
    pub timecode: String,
}

/// Extract the known fields from a line. Returns `None` when the line
/// carries none of them.
pub fn parse_line(line: &str) -> Option<DiagnosticFields> {
    let capture = |re: &Regex| re.captures(line).map(|c| c[1].to_string());

    let fields = DiagnosticFields {
        frames: capture(&FRAME_RE).and_then(|v| v.parse().ok()),
        fps: capture(&FPS_RE).and_then(|v| v.parse().ok()),
        kbps: capture(&BITRATE_RE).and_then(|v| v.parse().ok()),
        timecode: capture(&TIME_RE),
    };

    if fields == DiagnosticFields::default() {
        None
    } else {
        Some(fields)
    }
}

/// `clamp(position / duration * 100, 0, 100)`.
pub fn compute_percent(position_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (position_secs / duration_secs * 100.0).clamp(0.0, 100.0)
}

/// Stateful accumulator for one unit run.
///
/// Fields seen on earlier lines are carried forward, so a sample always
/// reports the latest known frame count, rate and bitrate.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    duration: Option<f64>,
    last_emitted: f64,
    latest: DiagnosticFields,
}

impl ProgressTracker {
    /// `duration` is the probed input length in seconds, if known.
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
            last_emitted: 0.0,
            latest: DiagnosticFields::default(),
        }
    }

    /// The percent carried by the most recent emitted sample.
    pub fn last_emitted(&self) -> f64 {
        self.last_emitted
    }

    /// Feed one diagnostic line; returns a sample when progress is known and
    /// has advanced by at least [`EMIT_STEP`] since the last emission.
    pub fn observe(&mut self, line: &str) -> Option<ProgressSample> {
        let fields = parse_line(line)?;

        if fields.frames.is_some() {
            self.latest.frames = fields.frames;
        }
        if fields.fps.is_some() {
            self.latest.fps = fields.fps;
        }
        if fields.kbps.is_some() {
            self.latest.kbps = fields.kbps;
        }

        let timecode = fields.timecode?;
        let duration = self.duration?;
        let position = parse_timecode(&timecode)?;
        let percent = compute_percent(position, duration);

        if percent - self.last_emitted < EMIT_STEP {
            return None;
        }
        self.last_emitted = percent;
        self.latest.timecode = Some(timecode.clone());

        Some(ProgressSample {
            percent,
            frames: self.latest.frames,
            fps: self.latest.fps,
            kbps: self.latest.kbps,
            timecode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS: &str =
        "frame=  240 fps= 48 q=28.0 size=    1024kB time=00:00:05.00 bitrate= 838.9kbits/s speed=1.9x";

    #[test]
    fn parses_all_four_fields() {
        let f = parse_line(STATUS).unwrap();
        assert_eq!(f.frames, Some(240));
        assert_eq!(f.fps, Some(48.0));
        assert_eq!(f.kbps, Some(838.9));
        assert_eq!(f.timecode.as_deref(), Some("00:00:05.00"));
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_line("Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'in.mp4':"), None);
        assert_eq!(parse_line("  Duration: N/A"), None);
    }

    #[test]
    fn bitrate_na_is_skipped() {
        let f = parse_line("frame=1 fps=0.0 time=00:00:00.04 bitrate=N/A").unwrap();
        assert_eq!(f.kbps, None);
        assert_eq!(f.frames, Some(1));
    }

    #[test]
    fn percent_is_clamped() {
        assert_eq!(compute_percent(5.0, 10.0), 50.0);
        assert_eq!(compute_percent(12.0, 10.0), 100.0);
        assert_eq!(compute_percent(-1.0, 10.0), 0.0);
        assert_eq!(compute_percent(1.0, 0.0), 0.0);
    }

    #[test]
    fn no_duration_means_no_samples() {
        let mut tracker = ProgressTracker::new(None);
        assert!(tracker.observe(STATUS).is_none());
    }

    #[test]
    fn emits_when_advanced_by_one_point() {
        let mut tracker = ProgressTracker::new(Some(100.0));
        let first = tracker.observe("time=00:00:01.50").unwrap();
        assert_eq!(first.percent, 1.5);
        // +0.5 points: throttled.
        assert!(tracker.observe("time=00:00:02.00").is_none());
        // +1.0 points: emitted.
        assert_eq!(tracker.observe("time=00:00:02.50").unwrap().percent, 2.5);
        // Going backwards never emits.
        assert!(tracker.observe("time=00:00:00.10").is_none());
    }

    #[test]
    fn carries_fields_forward() {
        let mut tracker = ProgressTracker::new(Some(10.0));
        assert!(tracker.observe("frame=50 fps=25").is_none());
        let sample = tracker.observe("time=00:00:05.00").unwrap();
        assert_eq!(sample.frames, Some(50));
        assert_eq!(sample.fps, Some(25.0));
        assert_eq!(sample.timecode, "00:00:05.00");
    }

    #[test]
    fn increasing_timecodes_give_monotone_throttled_stream() {
        let duration = 37.0;
        let mut tracker = ProgressTracker::new(Some(duration));
        let mut emitted = Vec::new();
        // Tenth-of-a-second steps, running past the end.
        for tenth in 0..450u32 {
            let secs = tenth as f64 / 10.0;
            let line = format!(
                "frame={tenth} fps=30 time=00:00:{:05.2} bitrate=900.0kbits/s",
                secs
            );
            if let Some(s) = tracker.observe(&line) {
                emitted.push(s.percent);
            }
        }
        assert!(!emitted.is_empty());
        for pair in emitted.windows(2) {
            assert!(pair[1] >= pair[0]);
            assert!(pair[1] - pair[0] >= EMIT_STEP);
        }
        assert!(*emitted.last().unwrap() <= 100.0);
        assert!(emitted.len() <= 100);
    }
}
