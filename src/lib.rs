//! # envlog
//!
//! Telemetry buffering and persistence pipeline for a battery-powered
//! environmental logger. Sensors are sampled at a runtime-adjustable rate,
//! readings are buffered in memory, flushed in blocks to removable storage,
//! and the whole pipeline is steered over a line-oriented control channel.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based [`config::LoggerConfig`] (TOML + `ENVLOG_` env).
//! - **`control`**: the command interpreter (`READ NOW`, `READBUFFER`, `SETT`,
//!   `STATE`, `LOGGING`, `SD`) and its bounded line reader.
//! - **`coordination`**: flush/eject/re-mount signalling, the sampling
//!   admission gate and the shared sample period.
//! - **`data`**: calendar clock, sample records and the bounded
//!   [`data::telemetry_buffer::TelemetryBuffer`].
//! - **`error`**: error taxonomy built on `thiserror`.
//! - **`hardware`**: the [`hardware::EnvironmentSensor`] capability and simulated sensors.
//! - **`pipeline`**: wires everything together and produces status snapshots.
//! - **`report`**: the [`report::Reporter`] and the output transport loop.
//! - **`storage`**: mountable storage devices (directory-backed and mock).
//! - **`tracing_setup`**: `tracing-subscriber` initialisation.
//! - **`workers`**: the sampling and persistence tasks.

pub mod config;
pub mod control;
pub mod coordination;
pub mod data;
pub mod error;
pub mod hardware;
pub mod pipeline;
pub mod report;
pub mod storage;
pub mod tracing_setup;
pub mod workers;

pub use error::{AppResult, LoggerError};
pub use pipeline::{Pipeline, PipelineHandles, StatusSnapshot};
