//! The operation model: which transcoding operations exist, their parameters,
//! and the capability tags the workflow sequencer reasons about.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timecode::{is_bitrate, parse_timestamp};

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// The fixed set of supported operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Convert,
    Compress,
    Thumbnail,
    Probe,
    ExtractAudio,
    ReplaceAudio,
    ToGif,
    Clip,
    Concatenate,
    Watermark,
    ExtractFrames,
}

impl OperationKind {
    /// Every kind, in declaration order.
    pub const ALL: [OperationKind; 11] = [
        OperationKind::Convert,
        OperationKind::Compress,
        OperationKind::Thumbnail,
        OperationKind::Probe,
        OperationKind::ExtractAudio,
        OperationKind::ReplaceAudio,
        OperationKind::ToGif,
        OperationKind::Clip,
        OperationKind::Concatenate,
        OperationKind::Watermark,
        OperationKind::ExtractFrames,
    ];

    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Convert => "convert",
            OperationKind::Compress => "compress",
            OperationKind::Thumbnail => "thumbnail",
            OperationKind::Probe => "probe",
            OperationKind::ExtractAudio => "extract_audio",
            OperationKind::ReplaceAudio => "replace_audio",
            OperationKind::ToGif => "to_gif",
            OperationKind::Clip => "clip",
            OperationKind::Concatenate => "concatenate",
            OperationKind::Watermark => "watermark",
            OperationKind::ExtractFrames => "extract_frames",
        }
    }

    /// Every kind except probe writes an output file.
    pub fn requires_output(&self) -> bool {
        !matches!(self, OperationKind::Probe)
    }

    /// Every kind except probe needs the input duration to report progress.
    pub fn requires_duration(&self) -> bool {
        !matches!(self, OperationKind::Probe)
    }

    /// The output is a playable media stream carrying video, usable as the
    /// source of a later snapshot step.
    pub fn produces_playable_media(&self) -> bool {
        matches!(
            self,
            OperationKind::Convert
                | OperationKind::Compress
                | OperationKind::Clip
                | OperationKind::Concatenate
                | OperationKind::Watermark
                | OperationKind::ReplaceAudio
        )
    }

    /// The output is one or more still images.
    pub fn is_snapshot(&self) -> bool {
        matches!(
            self,
            OperationKind::Thumbnail | OperationKind::ExtractFrames
        )
    }

    /// The output carries audio only.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, OperationKind::ExtractAudio)
    }

    /// The input must contain a video stream.
    pub fn requires_video_stream(&self) -> bool {
        matches!(
            self,
            OperationKind::Compress
                | OperationKind::Thumbnail
                | OperationKind::ToGif
                | OperationKind::Watermark
                | OperationKind::ExtractFrames
                | OperationKind::ReplaceAudio
        )
    }

    /// Extension used when an output path has to be generated.
    pub fn default_extension(&self) -> Option<&'static str> {
        match self {
            OperationKind::Probe => None,
            OperationKind::Thumbnail => Some("png"),
            OperationKind::ExtractFrames => Some("png"),
            OperationKind::ExtractAudio => Some("mp3"),
            OperationKind::ToGif => Some("gif"),
            _ => Some("mp4"),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        OperationKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::validation(format!("unknown operation kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Placement of a watermark overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

/// An operation kind together with its kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Re-encode into another container; `format` is an ffmpeg muxer name.
    Convert {
        #[serde(default)]
        format: Option<String>,
    },
    /// Re-encode with a target video bitrate.
    Compress {
        video_bitrate: String,
        #[serde(default)]
        audio_bitrate: Option<String>,
    },
    /// Grab a single frame at `timestamp`.
    Thumbnail {
        timestamp: String,
        #[serde(default)]
        width: Option<u32>,
    },
    /// Read container and stream metadata.
    Probe,
    ExtractAudio {
        #[serde(default)]
        codec: Option<String>,
        #[serde(default)]
        bitrate: Option<String>,
    },
    /// Swap the audio track for the one in `audio`.
    ReplaceAudio { audio: PathBuf },
    ToGif {
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        fps: Option<u32>,
        #[serde(default)]
        width: Option<u32>,
    },
    /// Cut `duration` starting at `start`; both accept `HH:MM:SS[.ms]` or
    /// seconds.
    Clip { start: String, duration: String },
    /// Append `inputs` after the step input.
    Concatenate { inputs: Vec<PathBuf> },
    Watermark {
        overlay: PathBuf,
        #[serde(default)]
        position: Position,
    },
    /// Dump frames at `fps` into a numbered image sequence.
    ExtractFrames { fps: f64 },
}

impl Operation {
    /// The kind of this operation.
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Convert { .. } => OperationKind::Convert,
            Operation::Compress { .. } => OperationKind::Compress,
            Operation::Thumbnail { .. } => OperationKind::Thumbnail,
            Operation::Probe => OperationKind::Probe,
            Operation::ExtractAudio { .. } => OperationKind::ExtractAudio,
            Operation::ReplaceAudio { .. } => OperationKind::ReplaceAudio,
            Operation::ToGif { .. } => OperationKind::ToGif,
            Operation::Clip { .. } => OperationKind::Clip,
            Operation::Concatenate { .. } => OperationKind::Concatenate,
            Operation::Watermark { .. } => OperationKind::Watermark,
            Operation::ExtractFrames { .. } => OperationKind::ExtractFrames,
        }
    }

    /// Check the kind-specific parameters.
    ///
    /// Auxiliary files (replacement audio, overlays, concatenation inputs)
    /// must already exist.
    pub fn validate(&self) -> Result<()> {
        match self {
            Operation::Convert { format } => {
                if let Some(f) = format {
                    require_non_empty("format", f)?;
                }
            }
            Operation::Compress {
                video_bitrate,
                audio_bitrate,
            } => {
                require_bitrate("video_bitrate", video_bitrate)?;
                if let Some(b) = audio_bitrate {
                    require_bitrate("audio_bitrate", b)?;
                }
            }
            Operation::Thumbnail { timestamp, width } => {
                require_timestamp("timestamp", timestamp)?;
                require_positive_u32("width", *width)?;
            }
            Operation::Probe => {}
            Operation::ExtractAudio { codec, bitrate } => {
                if let Some(c) = codec {
                    require_non_empty("codec", c)?;
                }
                if let Some(b) = bitrate {
                    require_bitrate("bitrate", b)?;
                }
            }
            Operation::ReplaceAudio { audio } => require_existing("audio", audio)?,
            Operation::ToGif {
                start,
                duration,
                fps,
                width,
            } => {
                if let Some(s) = start {
                    require_timestamp("start", s)?;
                }
                if let Some(d) = duration {
                    if !d.is_finite() || *d <= 0.0 {
                        return Err(Error::validation(format!(
                            "duration must be positive, got {d}"
                        )));
                    }
                }
                require_positive_u32("fps", *fps)?;
                require_positive_u32("width", *width)?;
            }
            Operation::Clip { start, duration } => {
                require_timestamp("start", start)?;
                let secs = require_timestamp("duration", duration)?;
                if secs <= 0.0 {
                    return Err(Error::validation("clip duration must be positive"));
                }
            }
            Operation::Concatenate { inputs } => {
                if inputs.is_empty() {
                    return Err(Error::validation(
                        "concatenate needs at least one additional input",
                    ));
                }
                for input in inputs {
                    require_existing("inputs", input)?;
                }
            }
            Operation::Watermark { overlay, .. } => require_existing("overlay", overlay)?,
            Operation::ExtractFrames { fps } => {
                if !fps.is_finite() || *fps <= 0.0 {
                    return Err(Error::validation(format!(
                        "frame rate must be positive, got {fps}"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

fn require_bitrate(field: &str, value: &str) -> Result<()> {
    if !is_bitrate(value) {
        return Err(Error::validation(format!(
            "{field} '{value}' is not a bitrate (expected e.g. 800k, 1.5M)"
        )));
    }
    Ok(())
}

fn require_timestamp(field: &str, value: &str) -> Result<f64> {
    parse_timestamp(value).ok_or_else(|| {
        Error::validation(format!(
            "{field} '{value}' is not a timestamp (expected HH:MM:SS[.ms] or seconds)"
        ))
    })
}

fn require_positive_u32(field: &str, value: Option<u32>) -> Result<()> {
    if value == Some(0) {
        return Err(Error::validation(format!("{field} must be positive")));
    }
    Ok(())
}

fn require_existing(field: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::validation(format!("{field} path must not be empty")));
    }
    if !path.exists() {
        return Err(Error::validation(format!(
            "{field} file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// OperationSpec
// ---------------------------------------------------------------------------

/// A fully described unit of work: what to do, on which input, into which
/// output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation: Operation,
    pub input: PathBuf,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl OperationSpec {
    pub fn new(operation: Operation, input: impl Into<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            operation,
            input: input.into(),
            output,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }

    /// Check that the spec can be launched: a non-empty input and, for every
    /// kind but probe, a non-empty output.
    pub fn check_ready(&self) -> Result<()> {
        if self.input.as_os_str().is_empty() {
            return Err(Error::validation("input path must not be empty"));
        }
        if self.kind().requires_output() {
            match &self.output {
                Some(out) if !out.as_os_str().is_empty() => {}
                _ => {
                    return Err(Error::validation(format!(
                        "{} requires an output path",
                        self.kind()
                    )))
                }
            }
        }
        Ok(())
    }

    /// Fill parameters left unset with their defaults.
    pub fn with_defaults(mut self) -> Self {
        let ext = self
            .output
            .as_deref()
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match &mut self.operation {
            Operation::Convert { format } if format.is_none() => {
                *format = ext.as_deref().map(muxer_for_extension);
            }
            Operation::ExtractAudio { codec, .. } if codec.is_none() => {
                *codec = Some(audio_codec_for_extension(ext.as_deref()).to_string());
            }
            Operation::ToGif { fps, width, .. } => {
                fps.get_or_insert(10);
                width.get_or_insert(480);
            }
            _ => {}
        }
        self
    }
}

/// Map a file extension to the ffmpeg muxer that writes it.
pub fn muxer_for_extension(ext: &str) -> String {
    match ext {
        "mkv" => "matroska".to_string(),
        "m4a" => "ipod".to_string(),
        "ts" => "mpegts".to_string(),
        other => other.to_string(),
    }
}

fn audio_codec_for_extension(ext: Option<&str>) -> &'static str {
    match ext {
        Some("aac") | Some("m4a") => "aac",
        Some("wav") => "pcm_s16le",
        Some("flac") => "flac",
        Some("ogg") => "libvorbis",
        Some("opus") => "libopus",
        _ => "libmp3lame",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_from_cli_spelling() {
        assert_eq!(
            "extract-audio".parse::<OperationKind>().unwrap(),
            OperationKind::ExtractAudio
        );
        assert_eq!("to_gif".parse::<OperationKind>().unwrap(), OperationKind::ToGif);
        assert!("transmogrify".parse::<OperationKind>().is_err());
    }

    #[test]
    fn capability_tags() {
        assert!(OperationKind::Convert.produces_playable_media());
        assert!(!OperationKind::ExtractAudio.produces_playable_media());
        assert!(OperationKind::Thumbnail.is_snapshot());
        assert!(!OperationKind::ToGif.is_snapshot());
        assert!(OperationKind::ExtractAudio.is_audio_only());
        assert!(!OperationKind::Probe.requires_output());
        assert!(OperationKind::Compress.requires_video_stream());
        assert_eq!(OperationKind::Thumbnail.default_extension(), Some("png"));
        assert_eq!(OperationKind::Probe.default_extension(), None);
    }

    #[test]
    fn operation_serde_uses_kind_tag() {
        let op: Operation =
            serde_json::from_str(r#"{"kind":"compress","video_bitrate":"800k"}"#).unwrap();
        assert_eq!(
            op,
            Operation::Compress {
                video_bitrate: "800k".into(),
                audio_bitrate: None
            }
        );

        let probe: Operation = serde_json::from_str(r#"{"kind":"probe"}"#).unwrap();
        assert_eq!(probe.kind(), OperationKind::Probe);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        let bad_bitrate = Operation::Compress {
            video_bitrate: "fast".into(),
            audio_bitrate: None,
        };
        assert!(matches!(bad_bitrate.validate(), Err(Error::Validation(_))));

        let bad_ts = Operation::Thumbnail {
            timestamp: "later".into(),
            width: None,
        };
        assert!(bad_ts.validate().is_err());

        let zero_clip = Operation::Clip {
            start: "0".into(),
            duration: "00:00:00".into(),
        };
        assert!(zero_clip.validate().is_err());

        let neg_fps = Operation::ExtractFrames { fps: -1.0 };
        assert!(neg_fps.validate().is_err());

        let missing_overlay = Operation::Watermark {
            overlay: PathBuf::from("/definitely/not/here.png"),
            position: Position::Center,
        };
        assert!(missing_overlay.validate().is_err());
    }

    #[test]
    fn validate_accepts_existing_aux_files() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let op = Operation::Watermark {
            overlay: tmp.path().to_path_buf(),
            position: Position::TopLeft,
        };
        assert!(op.validate().is_ok());
    }

    #[test]
    fn check_ready_requires_output_except_probe() {
        let spec = OperationSpec::new(
            Operation::Convert { format: None },
            "in.mp4",
            None,
        );
        assert!(matches!(spec.check_ready(), Err(Error::Validation(_))));

        let probe = OperationSpec::new(Operation::Probe, "in.mp4", None);
        assert!(probe.check_ready().is_ok());

        let empty_input = OperationSpec::new(Operation::Probe, "", None);
        assert!(empty_input.check_ready().is_err());
    }

    #[test]
    fn defaults_follow_output_extension() {
        let spec = OperationSpec::new(
            Operation::Convert { format: None },
            "in.mp4",
            Some(PathBuf::from("out.mkv")),
        )
        .with_defaults();
        assert_eq!(
            spec.operation,
            Operation::Convert {
                format: Some("matroska".into())
            }
        );

        let audio = OperationSpec::new(
            Operation::ExtractAudio {
                codec: None,
                bitrate: None,
            },
            "in.mp4",
            Some(PathBuf::from("out.flac")),
        )
        .with_defaults();
        assert!(matches!(
            audio.operation,
            Operation::ExtractAudio { codec: Some(ref c), .. } if c == "flac"
        ));

        let gif = OperationSpec::new(
            Operation::ToGif {
                start: None,
                duration: None,
                fps: None,
                width: Some(320),
            },
            "in.mp4",
            Some(PathBuf::from("out.gif")),
        )
        .with_defaults();
        assert!(matches!(
            gif.operation,
            Operation::ToGif { fps: Some(10), width: Some(320), .. }
        ));
    }
}
