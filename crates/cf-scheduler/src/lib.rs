//! # cf-scheduler
//!
//! Bounded-concurrency execution of independent operation units.
//!
//! [`Scheduler`] keeps a FIFO backlog, admits at most `concurrency` units at
//! a time, retries failed and timed-out units with a fixed backoff, and
//! reports through [`SchedulerEvent`]s, including an `Idle` event each time
//! the backlog drains.

pub mod scheduler;

pub use scheduler::{Scheduler, SchedulerEvent};
