//! Workflow builder and pre-flight validation.
//!
//! A [`Workflow`] is an input plus an ordered list of steps. Builder methods
//! take `&self` so that a workflow can be shared with the task running it;
//! while a run is in progress every builder call fails with
//! [`Error::Usage`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use cf_core::{Error, Operation, OperationKind, Position, Result, WorkflowId};

/// One step of a workflow.
///
/// `input` is filled by the sequencer just before the step runs; `output`
/// is filled then too when the caller did not give one.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    pub operation: Operation,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

impl WorkflowStep {
    pub fn new(operation: Operation, output: Option<PathBuf>) -> Self {
        Self {
            operation,
            input: None,
            output,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.operation.kind()
    }
}

#[derive(Debug, Default)]
struct WorkflowInner {
    input: Option<PathBuf>,
    steps: Vec<WorkflowStep>,
}

/// An ordered list of operations run as one job.
#[derive(Debug, Default)]
pub struct Workflow {
    id: WorkflowId,
    inner: Mutex<WorkflowInner>,
    running: AtomicBool,
    aborted: AtomicBool,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for `Workflow::new().set_input(..)`.
    pub fn with_input(input: impl Into<PathBuf>) -> Result<Self> {
        let wf = Self::new();
        wf.set_input(input)?;
        Ok(wf)
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    /// Apply `f` to the workflow unless a run is in progress. `begin_run`
    /// takes the same lock, so a change either lands before the run starts
    /// or is rejected.
    fn modify<R>(&self, f: impl FnOnce(&mut WorkflowInner) -> R) -> Result<R> {
        let mut inner = self.inner.lock();
        if self.is_running() {
            return Err(Error::usage("workflow cannot be modified while running"));
        }
        Ok(f(&mut inner))
    }

    /// Set the initial input.
    pub fn set_input(&self, input: impl Into<PathBuf>) -> Result<&Self> {
        let input = input.into();
        self.modify(|inner| {
            if input.as_os_str().is_empty() {
                return Err(Error::validation("workflow input must not be empty"));
            }
            inner.input = Some(input);
            Ok(())
        })??;
        Ok(self)
    }

    /// Append a step. Parameters are validated now; `output` may be left
    /// out to have one generated at run time.
    pub fn step(&self, operation: Operation, output: Option<PathBuf>) -> Result<&Self> {
        if self.is_running() {
            return Err(Error::usage("workflow cannot be modified while running"));
        }
        operation.validate()?;
        if let Some(out) = &output {
            if out.as_os_str().is_empty() {
                return Err(Error::validation(format!(
                    "{} output path must not be empty",
                    operation.kind()
                )));
            }
        }
        let kind = operation.kind();
        self.modify(|inner| inner.steps.push(WorkflowStep::new(operation, output)))?;
        tracing::debug!(workflow_id = %self.id, kind = %kind, "Step added");
        Ok(self)
    }

    pub fn convert(&self, format: Option<&str>, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::Convert {
                format: format.map(str::to_string),
            },
            Some(output.into()),
        )
    }

    pub fn compress(&self, video_bitrate: &str, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::Compress {
                video_bitrate: video_bitrate.to_string(),
                audio_bitrate: None,
            },
            Some(output.into()),
        )
    }

    pub fn thumbnail(&self, timestamp: &str, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::Thumbnail {
                timestamp: timestamp.to_string(),
                width: None,
            },
            Some(output.into()),
        )
    }

    pub fn probe(&self) -> Result<&Self> {
        self.step(Operation::Probe, None)
    }

    pub fn extract_audio(&self, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::ExtractAudio {
                codec: None,
                bitrate: None,
            },
            Some(output.into()),
        )
    }

    pub fn replace_audio(&self, audio: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::ReplaceAudio {
                audio: audio.into(),
            },
            Some(output.into()),
        )
    }

    pub fn to_gif(&self, start: Option<&str>, duration: Option<f64>, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::ToGif {
                start: start.map(str::to_string),
                duration,
                fps: None,
                width: None,
            },
            Some(output.into()),
        )
    }

    pub fn clip(&self, start: &str, duration: &str, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(
            Operation::Clip {
                start: start.to_string(),
                duration: duration.to_string(),
            },
            Some(output.into()),
        )
    }

    pub fn concatenate(&self, inputs: Vec<PathBuf>, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(Operation::Concatenate { inputs }, Some(output.into()))
    }

    pub fn watermark(
        &self,
        overlay: impl Into<PathBuf>,
        position: Position,
        output: impl Into<PathBuf>,
    ) -> Result<&Self> {
        self.step(
            Operation::Watermark {
                overlay: overlay.into(),
                position,
            },
            Some(output.into()),
        )
    }

    pub fn extract_frames(&self, fps: f64, output: impl Into<PathBuf>) -> Result<&Self> {
        self.step(Operation::ExtractFrames { fps }, Some(output.into()))
    }

    // ---- Inspection ----

    pub fn input(&self) -> Option<PathBuf> {
        self.inner.lock().input.clone()
    }

    /// Snapshot of the steps, including inputs/outputs filled by a run.
    pub fn steps(&self) -> Vec<WorkflowStep> {
        self.inner.lock().steps.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Ask a running workflow to stop before its next step. Returns `false`
    /// when the workflow is not running.
    pub fn abort(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        tracing::info!(workflow_id = %self.id, "Abort requested");
        self.aborted.store(true, Ordering::SeqCst);
        true
    }

    /// Pre-flight checks. Returns advisory warnings on success.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] when the input is unset, there are no steps,
    ///   two steps share an output, or an output directory cannot be
    ///   created.
    /// - [`Error::Io`] when the input is missing or unreadable.
    pub fn validate(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock();

        let input = inner
            .input
            .as_deref()
            .ok_or_else(|| Error::validation("workflow input is not set"))?;
        check_readable(input)?;

        if inner.steps.is_empty() {
            return Err(Error::validation("workflow has no steps"));
        }

        let mut seen = HashSet::new();
        for (i, step) in inner.steps.iter().enumerate() {
            if let Some(out) = &step.output {
                if !seen.insert(out.as_path()) {
                    return Err(Error::validation(format!(
                        "step {} output {} is used by an earlier step",
                        i + 1,
                        out.display()
                    )));
                }
            }
        }

        for step in &inner.steps {
            if let Some(dir) = step.output.as_deref().and_then(Path::parent) {
                if !dir.as_os_str().is_empty() && !dir.exists() {
                    std::fs::create_dir_all(dir).map_err(|e| {
                        Error::validation(format!(
                            "cannot create output directory {}: {e}",
                            dir.display()
                        ))
                    })?;
                }
            }
        }

        let warnings: Vec<String> = inner
            .steps
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| {
                let (prev, next) = (pair[0].kind(), pair[1].kind());
                prev.is_audio_only() && next.requires_video_stream() && !next.is_snapshot()
            })
            .map(|(i, pair)| {
                format!(
                    "step {} ({}) follows audio-only step {} ({}) but needs a video stream",
                    i + 2,
                    pair[1].kind(),
                    i + 1,
                    pair[0].kind()
                )
            })
            .collect();

        for warning in &warnings {
            tracing::warn!(workflow_id = %self.id, "{warning}");
        }
        Ok(warnings)
    }

    // ---- Run bookkeeping (sequencer only) ----

    /// Mark the workflow running. `None` when a run is already in progress.
    pub(crate) fn begin_run(&self) -> Option<RunGuard<'_>> {
        let _inner = self.inner.lock();
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        self.aborted.store(false, Ordering::SeqCst);
        Some(RunGuard { workflow: self })
    }

    pub(crate) fn with_steps<R>(&self, f: impl FnOnce(&mut [WorkflowStep]) -> R) -> R {
        f(&mut self.inner.lock().steps)
    }
}

/// Clears the running flag when a run ends, however it ends.
pub(crate) struct RunGuard<'a> {
    workflow: &'a Workflow,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.workflow.running.store(false, Ordering::SeqCst);
    }
}

fn check_readable(input: &Path) -> Result<()> {
    let meta = std::fs::metadata(input)?;
    if meta.is_file() {
        std::fs::File::open(input)?;
    }
    Ok(())
}
