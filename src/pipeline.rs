//! Pipeline assembly.
//!
//! [`Pipeline`] owns the shared state (buffer, coordinator, gate, period,
//! clock, reporter) and wires the workers and the control plane to it:
//!
//! ```text
//!              ┌──────────── ControlPlane ─────────────┐
//!              │ gate   period   coordinator   buffer  │
//!              ↓         ↓          ↓             ↑    │
//! SamplingWorker ──insert──→ TelemetryBuffer ──drain── PersistenceWorker → storage
//!       ↑                                                  │
//!  SharedClock (1 Hz ticker)                      Reporter ─→ dispatch → transport
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::LoggerConfig;
use crate::control::ControlPlane;
use crate::coordination::{AdmissionGate, FlushCoordinator, SamplePeriod};
use crate::data::clock::{CalendarTimestamp, EditPart, SharedClock};
use crate::data::record::SampleRecord;
use crate::data::telemetry_buffer::{consume_threshold, TelemetryBuffer};
use crate::error::AppResult;
use crate::hardware::EnvironmentSensor;
use crate::report::Reporter;
use crate::storage::{MountState, StorageDevice};
use crate::workers::{PersistencePhase, PersistenceStats, PersistenceWorker, SamplingWorker};

/// Clock tick period.
const CLOCK_TICK: Duration = Duration::from_secs(1);

/// Shared state of one logger instance.
pub struct Pipeline {
    clock: SharedClock,
    buffer: Arc<TelemetryBuffer>,
    coordinator: Arc<FlushCoordinator>,
    gate: Arc<AdmissionGate>,
    period: Arc<SamplePeriod>,
    reporter: Reporter,
    phase: Arc<watch::Sender<PersistencePhase>>,
    stats: Arc<PersistenceStats>,
    samples: Arc<AtomicU64>,
    consume_window: Duration,
    max_line_len: usize,
    retry_interval: Option<Duration>,
}

/// Join handles of the spawned background tasks.
pub struct PipelineHandles {
    /// Sampling worker task.
    pub sampler: JoinHandle<()>,
    /// Persistence worker task.
    pub persistence: JoinHandle<()>,
    /// One-second clock ticker.
    pub clock: JoinHandle<()>,
}

impl PipelineHandles {
    /// Abort every task without draining.
    pub fn abort(&self) {
        self.sampler.abort();
        self.persistence.abort();
        self.clock.abort();
    }
}

/// Point-in-time view for display and status-page collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Current clock reading.
    pub timestamp: String,
    /// Field selected by the date editor.
    pub edit_part: EditPart,
    /// `None` if the buffer lock timed out.
    pub occupied: Option<usize>,
    /// Buffer capacity in records.
    pub capacity: usize,
    /// Occupancy that triggers an automatic flush.
    pub threshold: usize,
    /// Whether the card is mounted.
    pub mount_state: MountState,
    /// Current persistence worker phase.
    pub persistence_phase: PersistencePhase,
    /// Admission gate open.
    pub sampling_active: bool,
    /// Sampling period in milliseconds.
    pub sample_period_ms: u64,
    /// `LOGGING` trace lines enabled.
    pub logging_enabled: bool,
    /// An error has been reported since start.
    pub fault: bool,
    /// Readings stored by the sampler.
    pub samples_taken: u64,
    /// Blocks appended to the log file.
    pub blocks_written: u64,
    /// Records appended to the log file.
    pub records_written: u64,
    /// Newest buffered record, if any.
    pub last_record: Option<SampleRecord>,
}

impl Pipeline {
    /// Build the shared state from a validated configuration.
    pub fn new(config: &LoggerConfig, reporter: Reporter) -> AppResult<Self> {
        let start = config.clock.start_timestamp()?;
        Ok(Self::with_clock(config, reporter, SharedClock::new(start)))
    }

    /// Build the shared state around an existing clock.
    pub fn with_clock(config: &LoggerConfig, reporter: Reporter, clock: SharedClock) -> Self {
        let coordinator = Arc::new(FlushCoordinator::new());
        let threshold = consume_threshold(
            config.buffer.consume_window,
            config.sampling.period,
            config.buffer.capacity,
        );
        let buffer = Arc::new(
            TelemetryBuffer::new(config.buffer.capacity, threshold, Arc::clone(&coordinator))
                .with_lock_timeout(config.buffer.lock_timeout),
        );
        reporter.set_logging(config.control.logging_enabled);
        let (phase, _) = watch::channel(PersistencePhase::Mounting);

        Self {
            clock,
            buffer,
            coordinator,
            gate: Arc::new(AdmissionGate::new(config.sampling.start_enabled)),
            period: Arc::new(SamplePeriod::new(config.sampling.period)),
            reporter,
            phase: Arc::new(phase),
            stats: Arc::new(PersistenceStats::default()),
            samples: Arc::new(AtomicU64::new(0)),
            consume_window: config.buffer.consume_window,
            max_line_len: config.control.max_line_len,
            retry_interval: config.storage.retry_interval,
        }
    }

    /// Command interpreter bound to this pipeline.
    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.coordinator),
            Arc::clone(&self.gate),
            Arc::clone(&self.period),
            self.reporter.clone(),
        )
        .with_consume_window(self.consume_window)
        .with_max_line_len(self.max_line_len)
    }

    /// Spawn the sampler, the persistence worker and the clock ticker.
    pub fn spawn(
        &self,
        sensor: Arc<dyn EnvironmentSensor>,
        device: Arc<dyn StorageDevice>,
    ) -> PipelineHandles {
        let sampler = SamplingWorker::new(
            sensor,
            Arc::clone(&self.buffer),
            Arc::clone(&self.gate),
            Arc::clone(&self.period),
            self.clock.clone(),
            self.reporter.clone(),
        )
        .with_counter(Arc::clone(&self.samples));

        let persistence = PersistenceWorker::new(
            device,
            Arc::clone(&self.buffer),
            Arc::clone(&self.coordinator),
            self.reporter.clone(),
        )
        .with_phase_channel(Arc::clone(&self.phase))
        .with_stats(Arc::clone(&self.stats))
        .with_retry_interval(self.retry_interval);

        info!(
            capacity = self.buffer.capacity(),
            threshold = self.buffer.threshold(),
            period_ms = self.period.get().as_millis() as u64,
            "Pipeline started"
        );

        PipelineHandles {
            sampler: tokio::spawn(sampler.run()),
            persistence: tokio::spawn(persistence.run()),
            clock: tokio::spawn(self.clock.clone().run_ticker(CLOCK_TICK)),
        }
    }

    /// Interpret control input until it closes or `interrupt` resolves, then
    /// shut down.
    ///
    /// The shutdown also runs when reading input fails; that error is returned
    /// afterwards.
    pub async fn serve<R, F>(
        &self,
        handles: PipelineHandles,
        input: R,
        interrupt: F,
        timeout: Duration,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        let control = self.control_plane();
        let result = tokio::select! {
            result = control.run(input) => result,
            () = interrupt => {
                info!("Interrupted");
                Ok(())
            }
        };
        if let Err(err) = &result {
            error!(error = %err, "Control input failed, shutting down");
        }

        self.shutdown(handles, timeout).await;
        result
    }

    /// Stop sampling, flush and unmount, then stop every task.
    ///
    /// Returns `false` if the persistence worker did not park within `timeout`.
    pub async fn shutdown(&self, handles: PipelineHandles, timeout: Duration) -> bool {
        self.gate.close().await;

        let mut phase = self.phase.subscribe();
        let parked = if *phase.borrow() == PersistencePhase::Writing {
            self.coordinator.request_eject();
            tokio::time::timeout(timeout, phase.wait_for(|p| *p == PersistencePhase::Parked))
                .await
                .is_ok_and(|r| r.is_ok())
        } else {
            true
        };
        if !parked {
            warn!(?timeout, "Persistence worker did not park before shutdown");
        }

        handles.abort();
        info!("Pipeline stopped");
        parked
    }

    /// Collect a point-in-time status view.
    pub fn status(&self) -> StatusSnapshot {
        let phase = *self.phase.borrow();
        StatusSnapshot {
            timestamp: self.clock.snapshot().to_string(),
            edit_part: self.clock.edit_part(),
            occupied: self.buffer.occupied().ok(),
            capacity: self.buffer.capacity(),
            threshold: self.buffer.threshold(),
            mount_state: phase.mount_state(),
            persistence_phase: phase,
            sampling_active: self.gate.is_open(),
            sample_period_ms: self.period.get().as_millis() as u64,
            logging_enabled: self.reporter.logging_enabled(),
            fault: self.reporter.fault_latched(),
            samples_taken: self.samples.load(Ordering::Relaxed),
            blocks_written: self.stats.blocks_written(),
            records_written: self.stats.records_written(),
            last_record: self.buffer.last_record().ok().flatten(),
        }
    }

    /// Shared telemetry buffer.
    pub fn buffer(&self) -> &Arc<TelemetryBuffer> {
        &self.buffer
    }

    /// Shared flush coordinator.
    pub fn coordinator(&self) -> &Arc<FlushCoordinator> {
        &self.coordinator
    }

    /// Shared real-time clock.
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Reporter used by every component.
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Persistence worker counters.
    pub fn stats(&self) -> &Arc<PersistenceStats> {
        &self.stats
    }

    /// Subscribe to persistence phase changes.
    pub fn phase(&self) -> watch::Receiver<PersistencePhase> {
        self.phase.subscribe()
    }

    /// Current calendar time.
    pub fn now(&self) -> CalendarTimestamp {
        self.clock.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report;

    #[test]
    fn initial_threshold_follows_period() {
        let mut config = LoggerConfig::default();
        config.sampling.period = Duration::from_millis(500);
        let (reporter, _rx) = report::channel(false);
        let pipeline = Pipeline::with_clock(&config, reporter, SharedClock::default());
        assert_eq!(pipeline.buffer().threshold(), 120);
    }

    #[test]
    fn status_reflects_configuration() {
        let mut config = LoggerConfig::default();
        config.sampling.start_enabled = false;
        config.control.logging_enabled = true;
        let (reporter, _rx) = report::channel(false);
        let pipeline = Pipeline::with_clock(&config, reporter, SharedClock::default());

        let status = pipeline.status();
        assert!(!status.sampling_active);
        assert!(status.logging_enabled);
        assert_eq!(status.capacity, 2000);
        assert_eq!(status.occupied, Some(0));
        assert_eq!(status.mount_state, MountState::Unmounted);
        assert_eq!(status.timestamp, "2021-01-01 00:00:00");
        assert!(status.last_record.is_none());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["sample_period_ms"], 1000);
    }
}
