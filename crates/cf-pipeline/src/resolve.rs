//! Input wiring between workflow steps and generated output names.
//!
//! Both functions are pure: they look only at the step list and their
//! arguments, never at the filesystem or at execution state.

use std::path::{Path, PathBuf};

use cf_core::OperationKind;

use crate::workflow::WorkflowStep;

/// The input step `index` (0-based) should read.
///
/// Snapshot steps (thumbnail, extract_frames) need a decodable video stream,
/// so they take the output of the nearest earlier step that produces
/// playable media and fall back to `original`. Every other step takes the
/// nearest earlier output (probe steps write none), or `original` for the
/// first step.
pub fn resolve_input(steps: &[WorkflowStep], index: usize, original: &Path) -> PathBuf {
    let kind = steps[index].kind();
    let mut earlier = steps[..index].iter().rev();

    let found = if kind.is_snapshot() {
        earlier
            .filter(|s| s.kind().produces_playable_media())
            .find_map(|s| s.output.clone())
    } else {
        earlier.find_map(|s| s.output.clone())
    };

    found.unwrap_or_else(|| original.to_path_buf())
}

/// `{dir}/{kind}_step{n}_{stamp}.{ext}`, with `n` 1-based. Frame
/// extraction gets a `%04d` counter; probe writes nothing and gets `None`.
pub fn generated_output(kind: OperationKind, index: usize, dir: &Path, stamp: i64) -> Option<PathBuf> {
    let ext = kind.default_extension()?;
    let base = format!("{kind}_step{}_{stamp}", index + 1);
    let name = match kind {
        OperationKind::ExtractFrames => format!("{base}_%04d.{ext}"),
        _ => format!("{base}.{ext}"),
    };
    Some(dir.join(name))
}

/// Directory for generated outputs: the configured one, else the directory
/// holding the workflow input.
pub fn output_dir(configured: Option<&Path>, input: &Path) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."))
}
