//! Unified error type for castforge.
//!
//! All crates funnel their failures into [`Error`]. The variants keep
//! structured signals (I/O kind, exit code, tool name) so that callers can
//! classify failures without parsing display text.

use std::time::Duration;

/// Unified error type covering all failure modes in castforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Parameters failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An API was called in a state that does not allow it (e.g. mutating a
    /// running workflow, starting a unit twice).
    #[error("Usage error: {0}")]
    Usage(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A required external binary is not installed or not executable.
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// Name of the missing tool.
        tool: String,
    },

    /// An external tool could not be driven (spawn, pipe or wait failure).
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Probing the input for its duration failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// The external process exited unsuccessfully.
    #[error("Process exited with code {}: {stderr}", code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ProcessExit {
        /// Exit code, `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Tail of the process diagnostic output.
        stderr: String,
    },

    /// An operation did not finish within its time limit.
    #[error("Timed out after {after:?}")]
    Timeout {
        /// The limit that elapsed.
        after: Duration,
    },

    /// The operation was cancelled before it finished.
    #[error("Cancelled: {reason}")]
    Cancelled {
        /// Why the operation was cancelled.
        reason: String,
    },

    /// A workflow step failed.
    #[error("Pipeline error [{step}]: {message}")]
    Pipeline {
        /// The step that failed.
        step: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Convenience constructor for [`Error::Usage`].
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(step: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Pipeline {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Whether this error was raised synchronously by argument or state
    /// checks, before any external work started.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Usage(_))
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
