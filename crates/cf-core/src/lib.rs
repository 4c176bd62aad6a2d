//! cf-core: shared types, IDs, errors, configuration, and event delivery.
//!
//! This crate is the foundational dependency for all other cf-* crates,
//! providing type-safe identifiers, a unified error type, the operation
//! model with its capability tags, application configuration, and the
//! single-consumer [`EventSink`](events::EventSink).

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod operation;
pub mod timecode;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use events::EventSink;
pub use ids::*;
pub use operation::*;
