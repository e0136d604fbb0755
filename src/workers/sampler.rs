//! Sampling worker: reads the sensors once per period while admitted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::coordination::{AdmissionGate, SamplePeriod};
use crate::data::clock::SharedClock;
use crate::data::telemetry_buffer::TelemetryBuffer;
use crate::hardware::EnvironmentSensor;
use crate::report::Reporter;

/// Outcome of a single sampling iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// The reading was buffered.
    Stored,
    /// Buffer full or lock timeout; the reading was discarded.
    Rejected,
    /// The sensor returned an error.
    SensorFailed,
}

/// Periodic producer feeding the telemetry buffer.
pub struct SamplingWorker {
    sensor: Arc<dyn EnvironmentSensor>,
    buffer: Arc<TelemetryBuffer>,
    gate: Arc<AdmissionGate>,
    period: Arc<SamplePeriod>,
    clock: SharedClock,
    reporter: Reporter,
    samples: Arc<AtomicU64>,
}

impl SamplingWorker {
    /// Create a sampler; nothing happens until [`run`](Self::run).
    pub fn new(
        sensor: Arc<dyn EnvironmentSensor>,
        buffer: Arc<TelemetryBuffer>,
        gate: Arc<AdmissionGate>,
        period: Arc<SamplePeriod>,
        clock: SharedClock,
        reporter: Reporter,
    ) -> Self {
        Self {
            sensor,
            buffer,
            gate,
            period,
            clock,
            reporter,
            samples: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count stored samples into a shared counter.
    pub fn with_counter(mut self, samples: Arc<AtomicU64>) -> Self {
        self.samples = samples;
        self
    }

    /// Read the sensors once and insert the result.
    ///
    /// Does not consult the admission gate.
    pub async fn sample_once(&self) -> SampleOutcome {
        let reading = match self.sensor.read().await {
            Ok(reading) => reading,
            Err(err) => {
                self.reporter.error(format!("Sensor read failed: {err:#}"));
                return SampleOutcome::SensorFailed;
            }
        };
        self.reporter.log("Sampled data.");

        match self.buffer.insert(reading, self.clock.snapshot()) {
            Ok(()) => {
                self.samples.fetch_add(1, Ordering::Relaxed);
                trace!(?reading, "Sample stored");
                SampleOutcome::Stored
            }
            Err(err) => {
                self.reporter.error(err.report_message());
                SampleOutcome::Rejected
            }
        }
    }

    /// Sample forever: pass the gate, sample, release, sleep one period.
    #[instrument(name = "sampler", skip(self), fields(sensor = self.sensor.name()))]
    pub async fn run(self) {
        loop {
            let permit = match self.gate.admit().await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("Admission gate closed permanently; sampler exiting");
                    return;
                }
            };
            self.sample_once().await;
            drop(permit);

            tokio::time::sleep(self.period.get()).await;
        }
    }
}
