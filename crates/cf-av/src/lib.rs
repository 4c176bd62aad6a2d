//! # cf-av
//!
//! External tool management and the Operation Unit for castforge.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder that either runs
//!   a tool to completion or spawns it and streams its diagnostics.
//! - **Argument building** ([`build_args`]) -- the deterministic mapping from
//!   an operation spec to a tool argument list.
//! - **Duration probing** ([`DurationProbe`]) -- the seam units use to learn
//!   the input length before they start.
//! - **Progress** ([`ProgressTracker`]) -- diagnostic lines in, throttled
//!   percentage samples out.
//! - **Units** ([`OperationUnit`]) -- one process per operation, with a
//!   monotone lifecycle and exactly one terminal outcome.

pub mod args;
pub mod command;
pub mod probe;
pub mod progress;
pub mod tools;
pub mod unit;

// ---- Re-exports for convenience ----

pub use args::{binary_for, build_args};
pub use command::{DiagnosticLines, ToolCommand, ToolOutput, ToolProcess};
pub use probe::{DurationProbe, FfprobeDuration, FixedDuration};
pub use progress::{ProgressSample, ProgressTracker};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use unit::{CancelReason, OperationUnit, Outcome, UnitContext, UnitEvent, UnitState};
