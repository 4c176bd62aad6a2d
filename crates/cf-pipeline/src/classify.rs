//! Workflow error taxonomy.
//!
//! Failures reaching the sequencer are mapped onto a small, stable set of
//! [`WorkflowErrorKind`]s. Structured signals (I/O error kind, error variant,
//! exit code) decide first; diagnostic text is consulted only for process
//! and probe failures, where nothing better is available.

use std::fmt;
use std::io;

use serde::Serialize;

use cf_av::{CancelReason, Outcome};
use cf_core::Error;

/// Category of a workflow failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    FileNotFound,
    PermissionDenied,
    NoCompatibleStream,
    InvalidMedia,
    ConversionFailed,
    ProcessExit { code: Option<i32> },
    Timeout,
    Aborted,
    AlreadyRunning,
    Validation,
    Pipeline,
}

impl fmt::Display for WorkflowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowErrorKind::FileNotFound => f.write_str("file not found"),
            WorkflowErrorKind::PermissionDenied => f.write_str("permission denied"),
            WorkflowErrorKind::NoCompatibleStream => f.write_str("no compatible stream"),
            WorkflowErrorKind::InvalidMedia => f.write_str("invalid media"),
            WorkflowErrorKind::ConversionFailed => f.write_str("conversion failed"),
            WorkflowErrorKind::ProcessExit { code: Some(c) } => write!(f, "process exited with {c}"),
            WorkflowErrorKind::ProcessExit { code: None } => f.write_str("process killed"),
            WorkflowErrorKind::Timeout => f.write_str("timeout"),
            WorkflowErrorKind::Aborted => f.write_str("pipeline aborted"),
            WorkflowErrorKind::AlreadyRunning => f.write_str("already running"),
            WorkflowErrorKind::Validation => f.write_str("validation"),
            WorkflowErrorKind::Pipeline => f.write_str("pipeline error"),
        }
    }
}

/// Where in a workflow an error belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepIndex {
    /// A step, 1-based.
    Step(usize),
    /// The workflow as a whole (pre-flight, abort, concurrent run).
    Global,
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepIndex::Step(n) => write!(f, "step {n}"),
            StepIndex::Global => f.write_str("workflow"),
        }
    }
}

/// A categorized workflow failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("{kind} ({step}): {message}")]
pub struct WorkflowError {
    pub kind: WorkflowErrorKind,
    pub step: StepIndex,
    pub message: String,
}

impl WorkflowError {
    pub fn new(kind: WorkflowErrorKind, step: StepIndex, message: impl Into<String>) -> Self {
        Self {
            kind,
            step,
            message: message.into(),
        }
    }

    pub fn aborted() -> Self {
        Self::new(WorkflowErrorKind::Aborted, StepIndex::Global, "pipeline aborted")
    }

    pub fn already_running() -> Self {
        Self::new(
            WorkflowErrorKind::AlreadyRunning,
            StepIndex::Global,
            "workflow is already running",
        )
    }

    /// Classify a core error raised at `step`.
    pub fn from_error(err: &Error, step: StepIndex) -> Self {
        Self::new(classify(err), step, err.to_string())
    }

    /// Classify a non-successful unit outcome. Returns `None` for `Done`.
    pub fn from_outcome(outcome: &Outcome, step: StepIndex) -> Option<Self> {
        match outcome {
            Outcome::Done { .. } => None,
            Outcome::Failed(err) => Some(Self::from_error(err, step)),
            Outcome::Cancelled {
                reason: CancelReason::Timeout,
            } => Some(Self::new(WorkflowErrorKind::Timeout, step, "step timed out")),
            Outcome::Cancelled { reason } => Some(Self::new(
                WorkflowErrorKind::Aborted,
                step,
                format!("step cancelled: {reason}"),
            )),
        }
    }
}

/// Map a core error onto the taxonomy.
pub fn classify(err: &Error) -> WorkflowErrorKind {
    match err {
        Error::Io { source } => match source.kind() {
            io::ErrorKind::NotFound => WorkflowErrorKind::FileNotFound,
            io::ErrorKind::PermissionDenied => WorkflowErrorKind::PermissionDenied,
            _ => WorkflowErrorKind::Pipeline,
        },
        Error::ToolNotFound { .. } => WorkflowErrorKind::FileNotFound,
        Error::Validation(_) | Error::Usage(_) => WorkflowErrorKind::Validation,
        Error::Timeout { .. } => WorkflowErrorKind::Timeout,
        Error::Cancelled { .. } => WorkflowErrorKind::Aborted,
        Error::ProcessExit { code, stderr } => {
            classify_text(stderr).unwrap_or(WorkflowErrorKind::ProcessExit { code: *code })
        }
        Error::Probe(message) => classify_text(message).unwrap_or(WorkflowErrorKind::InvalidMedia),
        Error::Tool { .. } | Error::Pipeline { .. } | Error::Internal(_) => {
            WorkflowErrorKind::Pipeline
        }
    }
}

/// Last-resort heuristics over ffmpeg diagnostic text.
///
/// Specific causes are checked before the generic "Conversion failed!" that
/// ffmpeg prints after almost every failure.
pub fn classify_text(text: &str) -> Option<WorkflowErrorKind> {
    const RULES: &[(&[&str], WorkflowErrorKind)] = &[
        (&["No such file or directory"], WorkflowErrorKind::FileNotFound),
        (&["Permission denied"], WorkflowErrorKind::PermissionDenied),
        (
            &["does not contain any stream", "matches no streams"],
            WorkflowErrorKind::NoCompatibleStream,
        ),
        (
            &["Invalid data found", "moov atom not found", "corrupt"],
            WorkflowErrorKind::InvalidMedia,
        ),
        (&["Conversion failed"], WorkflowErrorKind::ConversionFailed),
    ];

    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| text.contains(n)))
        .map(|(_, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn exit(code: i32, stderr: &str) -> Error {
        Error::ProcessExit {
            code: Some(code),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn structured_signals_win() {
        let missing = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(classify(&missing), WorkflowErrorKind::FileNotFound);

        let denied = Error::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert_eq!(classify(&denied), WorkflowErrorKind::PermissionDenied);

        let tool = Error::ToolNotFound {
            tool: "ffmpeg".into(),
        };
        assert_eq!(classify(&tool), WorkflowErrorKind::FileNotFound);

        assert_eq!(
            classify(&Error::validation("Conversion failed")),
            WorkflowErrorKind::Validation
        );
        assert_eq!(
            classify(&Error::Timeout {
                after: Duration::from_secs(1)
            }),
            WorkflowErrorKind::Timeout
        );
    }

    #[test]
    fn process_exit_uses_text_then_code() {
        assert_eq!(
            classify(&exit(1, "in.mp4: No such file or directory")),
            WorkflowErrorKind::FileNotFound
        );
        assert_eq!(
            classify(&exit(1, "Stream map '0:a:0' matches no streams.")),
            WorkflowErrorKind::NoCompatibleStream
        );
        assert_eq!(
            classify(&exit(
                1,
                "in.mp4: Invalid data found when processing input\nConversion failed!"
            )),
            WorkflowErrorKind::InvalidMedia
        );
        assert_eq!(
            classify(&exit(1, "Error while encoding\nConversion failed!")),
            WorkflowErrorKind::ConversionFailed
        );
        assert_eq!(
            classify(&exit(187, "something new")),
            WorkflowErrorKind::ProcessExit { code: Some(187) }
        );
    }

    #[test]
    fn probe_failures_default_to_invalid_media() {
        assert_eq!(
            classify(&Error::Probe("unparseable duration 'N/A'".into())),
            WorkflowErrorKind::InvalidMedia
        );
        assert_eq!(
            classify(&Error::Probe("x.mp4: Permission denied".into())),
            WorkflowErrorKind::PermissionDenied
        );
    }

    #[test]
    fn outcomes() {
        let done = Outcome::Done {
            output: None,
            metadata: None,
        };
        assert!(WorkflowError::from_outcome(&done, StepIndex::Step(1)).is_none());

        let timeout = Outcome::Cancelled {
            reason: CancelReason::Timeout,
        };
        let err = WorkflowError::from_outcome(&timeout, StepIndex::Step(2)).unwrap();
        assert_eq!(err.kind, WorkflowErrorKind::Timeout);
        assert_eq!(err.step, StepIndex::Step(2));

        let failed = Outcome::Failed(Arc::new(exit(1, "Conversion failed!")));
        let err = WorkflowError::from_outcome(&failed, StepIndex::Step(3)).unwrap();
        assert_eq!(err.kind, WorkflowErrorKind::ConversionFailed);
    }

    #[test]
    fn display() {
        assert_eq!(
            WorkflowError::aborted().to_string(),
            "pipeline aborted (workflow): pipeline aborted"
        );
        let err = WorkflowError::new(
            WorkflowErrorKind::ProcessExit { code: Some(1) },
            StepIndex::Step(2),
            "boom",
        );
        assert_eq!(err.to_string(), "process exited with 1 (step 2): boom");
    }
}
