//! # cf-pipeline
//!
//! Ordered multi-step workflows for castforge.
//!
//! This crate provides:
//!
//! - **[`Workflow`]** -- builder for an input plus ordered steps, with eager
//!   parameter checks and pre-flight validation.
//! - **Input wiring** ([`resolve`]) -- pure functions deciding what each step
//!   reads and where generated outputs go.
//! - **Step time limits** ([`timeouts`]) -- the per-kind table and config
//!   overrides.
//! - **Error taxonomy** ([`WorkflowError`]) -- failures mapped onto stable
//!   categories with the step they belong to.
//! - **[`Sequencer`]** -- runs a workflow one unit at a time, aggregating
//!   progress and ETA.

pub mod classify;
pub mod resolve;
pub mod sequencer;
pub mod timeouts;
pub mod workflow;

// Re-export key types at the crate root.
pub use classify::{classify, StepIndex, WorkflowError, WorkflowErrorKind};
pub use resolve::{generated_output, resolve_input};
pub use sequencer::{Sequencer, WorkflowEvent, WorkflowProgress};
pub use timeouts::step_timeout;
pub use workflow::{Workflow, WorkflowStep};
