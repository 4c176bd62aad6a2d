//! Deterministic argument lists for each operation kind.
//!
//! [`build_args`] is a pure function of the [`OperationSpec`]: no filesystem
//! access, no tool lookups. The same spec always yields the same arguments.

use std::path::Path;

use cf_core::timecode::{format_timecode, parse_timestamp};
use cf_core::{Operation, OperationKind, OperationSpec, Position};

/// Arguments placed before every ffmpeg invocation.
const FFMPEG_PREAMBLE: &[&str] = &["-hide_banner", "-nostdin", "-y"];

/// The binary that runs the given kind.
pub fn binary_for(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Probe => "ffprobe",
        _ => "ffmpeg",
    }
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().to_string()
}

/// Normalise a timestamp parameter for ffmpeg (`HH:MM:SS.mmm`).
fn ts_arg(s: &str) -> String {
    parse_timestamp(s)
        .map(format_timecode)
        .unwrap_or_else(|| s.to_string())
}

fn overlay_expr(position: Position) -> &'static str {
    match position {
        Position::TopLeft => "overlay=10:10",
        Position::TopRight => "overlay=main_w-overlay_w-10:10",
        Position::BottomLeft => "overlay=10:main_h-overlay_h-10",
        Position::BottomRight => "overlay=main_w-overlay_w-10:main_h-overlay_h-10",
        Position::Center => "overlay=(main_w-overlay_w)/2:(main_h-overlay_h)/2",
    }
}

/// Insert a `%04d` frame counter into an image-sequence output that lacks one.
fn frame_pattern(output: &Path) -> String {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if name.contains('%') {
        return path_arg(output);
    }
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "frame".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "png".to_string());
    path_arg(&output.with_file_name(format!("{stem}_%04d.{ext}")))
}

fn probe_args(input: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        input,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Build the argument list for a spec.
///
/// # Errors
///
/// Returns [`cf_core::Error::Validation`] when the spec lacks its input, or
/// its output for kinds that write one.
pub fn build_args(spec: &OperationSpec) -> cf_core::Result<Vec<String>> {
    spec.check_ready()?;

    let input = path_arg(&spec.input);
    let output = spec.output.as_deref().map(path_arg).unwrap_or_default();

    let mut args: Vec<String> = FFMPEG_PREAMBLE.iter().map(|s| s.to_string()).collect();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    match &spec.operation {
        Operation::Probe => return Ok(probe_args(&input)),
        Operation::Convert { format } => {
            push(&["-i", &input]);
            if let Some(f) = format {
                push(&["-f", f]);
            }
            push(&[&output]);
        }
        Operation::Compress {
            video_bitrate,
            audio_bitrate,
        } => {
            push(&["-i", &input, "-c:v", "libx264", "-b:v", video_bitrate]);
            if let Some(ab) = audio_bitrate {
                push(&["-c:a", "aac", "-b:a", ab]);
            }
            push(&[&output]);
        }
        Operation::Thumbnail { timestamp, width } => {
            push(&["-ss", &ts_arg(timestamp), "-i", &input, "-frames:v", "1"]);
            if let Some(w) = width {
                push(&["-vf", &format!("scale={w}:-1")]);
            }
            push(&[&output]);
        }
        Operation::ExtractAudio { codec, bitrate } => {
            push(&["-i", &input, "-vn"]);
            if let Some(c) = codec {
                push(&["-c:a", c]);
            }
            if let Some(b) = bitrate {
                push(&["-b:a", b]);
            }
            push(&[&output]);
        }
        Operation::ReplaceAudio { audio } => {
            push(&[
                "-i",
                &input,
                "-i",
                &path_arg(audio),
                "-map",
                "0:v:0",
                "-map",
                "1:a:0",
                "-c:v",
                "copy",
                "-shortest",
                &output,
            ]);
        }
        Operation::ToGif {
            start,
            duration,
            fps,
            width,
        } => {
            if let Some(s) = start {
                push(&["-ss", &ts_arg(s)]);
            }
            if let Some(d) = duration {
                push(&["-t", &format!("{d}")]);
            }
            let filter = format!(
                "fps={},scale={}:-1:flags=lanczos",
                fps.unwrap_or(10),
                width.unwrap_or(480)
            );
            push(&["-i", &input, "-vf", &filter, "-loop", "0", &output]);
        }
        Operation::Clip { start, duration } => {
            push(&[
                "-ss",
                &ts_arg(start),
                "-i",
                &input,
                "-t",
                &ts_arg(duration),
                "-c",
                "copy",
                &output,
            ]);
        }
        Operation::Concatenate { inputs } => {
            push(&["-i", &input]);
            for extra in inputs {
                push(&["-i", &path_arg(extra)]);
            }
            let n = inputs.len() + 1;
            let streams: String = (0..n).map(|i| format!("[{i}:v][{i}:a]")).collect();
            let filter = format!("{streams}concat=n={n}:v=1:a=1[v][a]");
            push(&[
                "-filter_complex",
                &filter,
                "-map",
                "[v]",
                "-map",
                "[a]",
                &output,
            ]);
        }
        Operation::Watermark { overlay, position } => {
            push(&[
                "-i",
                &input,
                "-i",
                &path_arg(overlay),
                "-filter_complex",
                overlay_expr(*position),
                &output,
            ]);
        }
        Operation::ExtractFrames { fps } => {
            let pattern = spec
                .output
                .as_deref()
                .map(frame_pattern)
                .unwrap_or_default();
            push(&["-i", &input, "-vf", &format!("fps={fps}"), &pattern]);
        }
    }

    Ok(args)
}
