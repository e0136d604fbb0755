//! Sensor capabilities.
//!
//! The sampler only needs one capability from the hardware: produce a full set
//! of environmental readings on demand. Real boards implement
//! [`EnvironmentSensor`] on top of their barometer and light-sensor drivers;
//! [`mock::SimulatedEnvironment`] stands in for them when no hardware is
//! attached.
//!
//! # Contract
//! - `read` returns temperature in °C, pressure in mBar and light level in volts
//! - A failed read is reported by the caller and the sample is skipped
//! - Implementations must be `Send + Sync`; use interior mutability for state

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

use crate::data::record::Reading;

/// Capability: acquire one environmental reading.
#[async_trait]
pub trait EnvironmentSensor: Send + Sync {
    /// Read temperature, pressure and light level.
    async fn read(&self) -> Result<Reading>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        "environment sensor"
    }
}
