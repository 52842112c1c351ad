//! Traffic scenario generation and steerable simulation sessions.
//!
//! A scenario request is resolved to a bounding box, turned into a road
//! network and per-class routes by external tools, and then replayed in an
//! engine whose vehicles are streamed to an observer one step at a time.

pub mod generation;
pub mod geometry;
pub mod math;
pub mod prelude;
pub mod scenario_interface;
pub mod session;
pub mod settings;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;

pub use prelude::{SessionError, StageError, ValidationError};
