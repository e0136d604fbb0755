//! Telemetry data model and the in-memory buffer.
//!
//! - [`clock`]: calendar timestamp and the shared wall clock
//! - [`record`]: readings, stamped records and their text rendering
//! - [`telemetry_buffer`]: bounded FIFO between sampler and persistence worker

pub mod clock;
pub mod record;
pub mod telemetry_buffer;
