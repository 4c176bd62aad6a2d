//! Duration probing.
//!
//! Units need the input duration before they start so that timecodes in the
//! diagnostic stream can be turned into percentages. [`DurationProbe`] is the
//! seam; [`FfprobeDuration`] is the production implementation.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::ToolCommand;

/// Probes are short; a wedged ffprobe should not stall a unit for long.
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves the duration of a media file in seconds.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Return the duration of `input` in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`cf_core::Error::Probe`] (or a tool error) when the duration
    /// cannot be determined.
    async fn duration(&self, input: &Path) -> cf_core::Result<f64>;
}

/// A probe backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeDuration {
    ffprobe_path: PathBuf,
}

impl FfprobeDuration {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Build from a registry, failing if ffprobe was not discovered.
    pub fn from_registry(tools: &crate::ToolRegistry) -> cf_core::Result<Self> {
        Ok(Self::new(tools.require("ffprobe")?.path.clone()))
    }
}

#[async_trait]
impl DurationProbe for FfprobeDuration {
    async fn duration(&self, input: &Path) -> cf_core::Result<f64> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.timeout(PROBE_TIMEOUT);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ]);
        cmd.arg(input.to_string_lossy().as_ref());

        let output = cmd.execute().await.map_err(|e| match e {
            cf_core::Error::ProcessExit { stderr, .. } => cf_core::Error::Probe(format!(
                "ffprobe failed for {}: {stderr}",
                input.display()
            )),
            other => other,
        })?;

        parse_duration_output(&output.stdout)
    }
}

/// A probe that always answers with a known duration.
#[derive(Debug, Clone, Copy)]
pub struct FixedDuration(pub f64);

#[async_trait]
impl DurationProbe for FixedDuration {
    async fn duration(&self, _input: &Path) -> cf_core::Result<f64> {
        Ok(self.0)
    }
}

/// Parse the single-value output of
/// `ffprobe -show_entries format=duration -of default=noprint_wrappers=1:nokey=1`.
pub fn parse_duration_output(stdout: &str) -> cf_core::Result<f64> {
    let value = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| cf_core::Error::Probe("ffprobe reported no duration".into()))?;

    let secs: f64 = value
        .parse()
        .map_err(|_| cf_core::Error::Probe(format!("unparseable duration '{value}'")))?;

    if !secs.is_finite() || secs <= 0.0 {
        return Err(cf_core::Error::Probe(format!(
            "duration must be positive, got {secs}"
        )));
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_duration() {
        assert_eq!(parse_duration_output("12.345000\n").unwrap(), 12.345);
        assert_eq!(parse_duration_output("\n  7\n").unwrap(), 7.0);
    }

    #[test]
    fn rejects_missing_or_bad_duration() {
        assert!(matches!(
            parse_duration_output(""),
            Err(cf_core::Error::Probe(_))
        ));
        assert!(parse_duration_output("N/A").is_err());
        assert!(parse_duration_output("0.0").is_err());
    }

    #[tokio::test]
    async fn fixed_duration_answers() {
        let probe = FixedDuration(42.0);
        assert_eq!(probe.duration(Path::new("x.mp4")).await.unwrap(), 42.0);
    }

    #[tokio::test]
    async fn missing_ffprobe_is_tool_not_found() {
        let probe = FfprobeDuration::new(PathBuf::from("/nonexistent/ffprobe_xyz"));
        let err = probe.duration(Path::new("x.mp4")).await.unwrap_err();
        assert!(matches!(err, cf_core::Error::ToolNotFound { .. }));
    }

    #[test]
    fn from_registry_requires_ffprobe() {
        assert!(FfprobeDuration::from_registry(&crate::ToolRegistry::empty()).is_err());
    }
}
