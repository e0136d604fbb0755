//! Mock Sensor Implementations
//!
//! Simulated sensors for running the logger without a board attached.
//!
//! # Available Mocks
//!
//! - `SimulatedEnvironment` - BMP280-like temperature/pressure plus an LDR
//!   voltage, drifting slowly with seeded noise
//! - `FixedSensor` - returns the same reading every time, or fails on demand

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::EnvironmentSensor;
use crate::data::record::Reading;

/// Maximum LDR output voltage.
const LIGHT_FULL_SCALE_V: f32 = 3.3;

// =============================================================================
// SimulatedEnvironment
// =============================================================================

/// Simulated barometer and light sensor.
///
/// Values random-walk around a base point and are clamped to physical ranges:
/// - temperature around 21 °C
/// - pressure around 1013.25 mBar
/// - light between 0 and 3.3 V
pub struct SimulatedEnvironment {
    state: Mutex<SimState>,
}

struct SimState {
    rng: StdRng,
    current: Reading,
}

impl SimulatedEnvironment {
    /// Create a simulation seeded from the OS.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a deterministic simulation.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(SimState {
                rng,
                current: Reading::new(21.0, 1013.25, 1.65),
            }),
        }
    }
}

impl Default for SimulatedEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvironmentSensor for SimulatedEnvironment {
    async fn read(&self) -> Result<Reading> {
        let mut state = self.state.lock();
        let dt: f32 = state.rng.gen_range(-0.05..=0.05);
        let dp: f32 = state.rng.gen_range(-0.2..=0.2);
        let dl: f32 = state.rng.gen_range(-0.02..=0.02);

        let next = Reading::new(
            (state.current.temperature + dt).clamp(-40.0, 85.0),
            (state.current.pressure + dp).clamp(300.0, 1100.0),
            (state.current.light + dl).clamp(0.0, LIGHT_FULL_SCALE_V),
        );
        state.current = next;
        Ok(next)
    }

    fn name(&self) -> &str {
        "simulated BMP280 + LDR"
    }
}

// =============================================================================
// FixedSensor
// =============================================================================

/// Sensor returning a constant reading. Can be told to fail.
pub struct FixedSensor {
    reading: Reading,
    failing: AtomicBool,
    reads: AtomicU64,
}

impl FixedSensor {
    /// Sensor that always returns `reading`.
    pub fn new(reading: Reading) -> Self {
        Self {
            reading,
            failing: AtomicBool::new(false),
            reads: AtomicU64::new(0),
        }
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of read attempts so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnvironmentSensor for FixedSensor {
    async fn read(&self) -> Result<Reading> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            bail!("sensor not responding");
        }
        Ok(self.reading)
    }

    fn name(&self) -> &str {
        "fixed sensor"
    }
}
