//! castforge - orchestration of external ffmpeg transcoding jobs
//!
//! This library crate exposes the façade and job-file formats used by the
//! CLI and by integration tests. The building blocks live in the `cf-*`
//! crates.

pub mod jobfile;
pub mod transcoder;

pub use transcoder::Transcoder;
