//! Shared test harness for integration tests.
//!
//! Provides [`Harness`], a temp directory holding fake `ffmpeg` and
//! `ffprobe` shell scripts, a sample input file, and a [`Transcoder`] wired
//! to them. The fake ffmpeg appends its arguments to `invocations.log`,
//! prints progress lines to stderr and touches its last argument.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cf_av::{FixedDuration, ToolRegistry};
use cf_core::config::Config;
use castforge::Transcoder;
use tempfile::TempDir;

/// Duration reported for every input, in seconds.
pub const SAMPLE_DURATION: f64 = 10.0;

/// A fake ffmpeg that reports 25%, 50% then 100% and succeeds.
pub const FFMPEG_OK: &str = r#"echo "$@" >> "$(dirname "$0")/invocations.log"
for last; do :; done
echo "frame=  10 fps=25.0 q=28.0 size=  256kB time=00:00:02.50 bitrate= 838.9kbits/s speed=1.0x" >&2
echo "frame=  20 fps=25.0 q=28.0 size=  512kB time=00:00:05.00 bitrate= 838.9kbits/s speed=1.0x" >&2
echo "frame=  40 fps=25.0 q=28.0 size= 1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=1.0x" >&2
touch "$last"
exit 0"#;

/// A fake ffmpeg that rejects its input.
pub const FFMPEG_BAD_INPUT: &str = r#"echo "$@" >> "$(dirname "$0")/invocations.log"
echo "in.mp4: Invalid data found when processing input" >&2
exit 1"#;

/// A fake ffmpeg that hangs until killed.
pub const FFMPEG_HANG: &str = r#"echo "$@" >> "$(dirname "$0")/invocations.log"
exec sleep 30"#;

const FFPROBE: &str = r#"case "$*" in
  *-version*) echo "ffprobe version 6.1-fake"; exit 0 ;;
  *format=duration*) echo "10.000000"; exit 0 ;;
  *) echo '{"format":{"duration":"10.000000","format_name":"mov,mp4"},"streams":[{"codec_type":"video"}]}'; exit 0 ;;
esac"#;

/// Write an executable shell script named `name` into `dir`.
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod");
    path
}

pub struct Harness {
    pub dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub input: PathBuf,
}

impl Harness {
    /// Harness whose ffmpeg succeeds.
    pub fn new() -> Self {
        Self::with_ffmpeg(FFMPEG_OK)
    }

    pub fn with_ffmpeg(body: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let ffmpeg = fake_tool(dir.path(), "ffmpeg", body);
        let ffprobe = fake_tool(dir.path(), "ffprobe", FFPROBE);
        let input = dir.path().join("sample.mp4");
        std::fs::write(&input, b"not really a video").expect("write input");
        Self {
            dir,
            ffmpeg,
            ffprobe,
            input,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn registry(&self) -> ToolRegistry {
        ToolRegistry::empty()
            .with_tool("ffmpeg", &self.ffmpeg)
            .with_tool("ffprobe", &self.ffprobe)
    }

    /// A transcoder using the fake tools and a fixed duration.
    pub fn transcoder(&self) -> Transcoder {
        self.transcoder_with(Config::default())
    }

    pub fn transcoder_with(&self, config: Config) -> Transcoder {
        Transcoder::with_parts(
            config,
            Arc::new(self.registry()),
            Arc::new(FixedDuration(SAMPLE_DURATION)),
        )
    }

    /// Argument lines recorded by the fake ffmpeg, one per invocation.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(self.path("invocations.log"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// A config file pointing at the fake tools.
    pub fn write_config(&self, extra: serde_json::Value) -> PathBuf {
        let mut config = serde_json::json!({
            "tools": {
                "ffmpeg_path": self.ffmpeg,
                "ffprobe_path": self.ffprobe,
            }
        });
        if let (Some(base), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                base.insert(k.clone(), v.clone());
            }
        }
        let path = self.path("config.json");
        std::fs::write(&path, serde_json::to_string_pretty(&config).expect("json"))
            .expect("write config");
        path
    }
}
