//! Persistence worker: owns the storage device lifecycle.
//!
//! # Architecture
//!
//! ```text
//! Sampler → TelemetryBuffer ──(threshold / SD F / SD E)──→ FlushCoordinator
//!                                                              ↓
//!                                                     PersistenceWorker
//!                                                              ↓
//!                                                      <mount>/data.txt
//! ```
//!
//! # State machine
//!
//! ```text
//!            mount+open ok
//!  Mounting ─────────────────→ Writing ──┐ flush wake: drain(clear) + append
//!     ↑   │ mount/open failed      │  ↑──┘
//!     │   ↓                        │ eject observed after a write
//!     │  Parked(Failed)            ↓
//!     │   │ SD M / retry timer   Unmounting ── close + unmount ──→ Parked(Ejected)
//!     └───┴──────────────────────────────────────────────────────────┘ SD M
//! ```
//!
//! The eject flag is checked once per wake cycle, after the drained block has
//! been written, so an in-flight write is never interrupted. Records drained
//! for a write that then fails are lost and reported.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::coordination::FlushCoordinator;
use crate::data::record::Rendered;
use crate::data::telemetry_buffer::TelemetryBuffer;
use crate::report::Reporter;
use crate::storage::{LogFile, MountState, StorageDevice};

/// Externally visible phase of the persistence worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PersistencePhase {
    /// Mounting the card and opening the log file.
    #[default]
    Mounting,
    /// Mounted; appending a block on every flush wake-up.
    Writing,
    /// Closing the file and unmounting after an eject.
    Unmounting,
    /// Unmounted, waiting for a re-mount request or the retry timer.
    Parked,
}

impl PersistencePhase {
    /// Whether the card is mounted in this phase.
    pub fn mount_state(self) -> MountState {
        match self {
            PersistencePhase::Writing | PersistencePhase::Unmounting => MountState::Mounted,
            PersistencePhase::Mounting | PersistencePhase::Parked => MountState::Unmounted,
        }
    }
}

/// Why the worker is parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParkReason {
    /// Unmounted on request; wait for an explicit re-mount.
    Ejected,
    /// Mount or open failed; re-mount request or retry timer.
    Failed,
}

enum State {
    Mounting,
    Writing(Box<dyn LogFile>),
    Unmounting(Box<dyn LogFile>),
    Parked(ParkReason),
}

impl State {
    fn phase(&self) -> PersistencePhase {
        match self {
            State::Mounting => PersistencePhase::Mounting,
            State::Writing(_) => PersistencePhase::Writing,
            State::Unmounting(_) => PersistencePhase::Unmounting,
            State::Parked(_) => PersistencePhase::Parked,
        }
    }
}

/// Counters maintained by the persistence worker.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    drain_cycles: AtomicU64,
    blocks_written: AtomicU64,
    records_written: AtomicU64,
    write_failures: AtomicU64,
    mount_failures: AtomicU64,
}

impl PersistenceStats {
    /// Flush wake-ups handled while mounted.
    pub fn drain_cycles(&self) -> u64 {
        self.drain_cycles.load(Ordering::Relaxed)
    }

    /// Blocks appended to the log file.
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written.load(Ordering::Relaxed)
    }

    /// Records appended to the log file.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }

    /// Appends that failed, each losing its drained block.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Failed mount or open attempts.
    pub fn mount_failures(&self) -> u64 {
        self.mount_failures.load(Ordering::Relaxed)
    }
}

/// Background worker that drains the buffer to storage on every flush signal.
pub struct PersistenceWorker {
    device: Arc<dyn StorageDevice>,
    buffer: Arc<TelemetryBuffer>,
    coordinator: Arc<FlushCoordinator>,
    reporter: Reporter,
    phase: Arc<watch::Sender<PersistencePhase>>,
    stats: Arc<PersistenceStats>,
    retry_interval: Option<Duration>,
}

impl PersistenceWorker {
    /// Create a worker; nothing happens until [`run`](Self::run).
    pub fn new(
        device: Arc<dyn StorageDevice>,
        buffer: Arc<TelemetryBuffer>,
        coordinator: Arc<FlushCoordinator>,
        reporter: Reporter,
    ) -> Self {
        let (phase, _) = watch::channel(PersistencePhase::Mounting);
        Self {
            device,
            buffer,
            coordinator,
            reporter,
            phase: Arc::new(phase),
            stats: Arc::new(PersistenceStats::default()),
            retry_interval: None,
        }
    }

    /// Publish phase changes on an existing channel.
    pub fn with_phase_channel(mut self, phase: Arc<watch::Sender<PersistencePhase>>) -> Self {
        self.phase = phase;
        self
    }

    /// Share counters with the caller.
    pub fn with_stats(mut self, stats: Arc<PersistenceStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Retry a failed mount after `interval` as well as on re-mount requests.
    pub fn with_retry_interval(mut self, interval: Option<Duration>) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Subscribe to phase changes.
    pub fn subscribe(&self) -> watch::Receiver<PersistencePhase> {
        self.phase.subscribe()
    }

    /// Shared handle to the worker's counters.
    pub fn stats(&self) -> Arc<PersistenceStats> {
        Arc::clone(&self.stats)
    }

    /// Run the state machine forever.
    #[instrument(name = "persistence", skip(self), fields(device = %self.device.describe()))]
    pub async fn run(self) {
        let mut state = State::Mounting;
        loop {
            self.phase.send_replace(state.phase());
            state = self.step(state).await;
        }
    }

    async fn step(&self, state: State) -> State {
        match state {
            State::Mounting => self.mount().await,
            State::Writing(file) => self.write_cycle(file).await,
            State::Unmounting(file) => self.unmount(file).await,
            State::Parked(reason) => self.park(reason).await,
        }
    }

    async fn mount(&self) -> State {
        if let Err(err) = self.device.mount().await {
            warn!(error = %err, "Mount failed");
            self.stats.mount_failures.fetch_add(1, Ordering::Relaxed);
            self.reporter.error("SD mount failed.");
            return State::Parked(ParkReason::Failed);
        }

        match self.device.open_append().await {
            Ok(file) => {
                self.coordinator.discard_remount();
                info!("Storage mounted, log file open");
                self.reporter.log("SD CARD: MOUNTED");
                State::Writing(file)
            }
            Err(err) => {
                warn!(error = %err, "Open failed");
                self.stats.mount_failures.fetch_add(1, Ordering::Relaxed);
                self.reporter.error("File cannot be opened.");
                if let Err(err) = self.device.unmount().await {
                    warn!(error = %err, "Unmount after failed open also failed");
                }
                State::Parked(ParkReason::Failed)
            }
        }
    }

    async fn write_cycle(&self, mut file: Box<dyn LogFile>) -> State {
        self.coordinator.wait_for_flush().await;
        self.stats.drain_cycles.fetch_add(1, Ordering::Relaxed);

        match self.buffer.drain(0, None, true) {
            Ok(Rendered::Records { text, count }) => match file.append(&text).await {
                Ok(()) => {
                    self.stats.blocks_written.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .records_written
                        .fetch_add(count as u64, Ordering::Relaxed);
                    debug!(records = count, "Block written");
                    self.reporter.log("Wrote data block to SD card.");
                }
                Err(err) => {
                    self.stats.write_failures.fetch_add(1, Ordering::Relaxed);
                    self.reporter
                        .error(format!("SD write failed, {count} records lost: {err}"));
                }
            },
            Ok(Rendered::NoRecords) => debug!("Flush with empty buffer"),
            Err(err) => self.reporter.error(err.report_message()),
        }

        if self.coordinator.take_eject() {
            State::Unmounting(file)
        } else {
            State::Writing(file)
        }
    }

    async fn unmount(&self, file: Box<dyn LogFile>) -> State {
        // Only SD M issued from here on brings the card back.
        self.coordinator.discard_remount();
        if let Err(err) = file.close().await {
            self.reporter.error(format!("Closing log file failed: {err}"));
        }
        if let Err(err) = self.device.unmount().await {
            self.reporter.error(format!("SD unmount failed: {err}"));
        }
        info!("Storage unmounted");
        self.reporter.respond("SD CARD: UNMOUNTED");
        State::Parked(ParkReason::Ejected)
    }

    async fn park(&self, reason: ParkReason) -> State {
        debug!(?reason, "Parked");
        match (reason, self.retry_interval) {
            (ParkReason::Failed, Some(interval)) => {
                tokio::select! {
                    _ = self.coordinator.wait_for_remount() => {}
                    _ = tokio::time::sleep(interval) => debug!("Retrying mount after backoff"),
                }
            }
            _ => self.coordinator.wait_for_remount().await,
        }
        State::Mounting
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::clock::CalendarTimestamp;
    use crate::data::record::Reading;
    use crate::report;
    use crate::storage::mock::MockStorage;
    use tokio::time::timeout;

    struct Harness {
        buffer: Arc<TelemetryBuffer>,
        coordinator: Arc<FlushCoordinator>,
        device: MockStorage,
        phase: watch::Receiver<PersistencePhase>,
        stats: Arc<PersistenceStats>,
        output: tokio::sync::mpsc::UnboundedReceiver<String>,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start(device: MockStorage, retry: Option<Duration>) -> Self {
            let coordinator = Arc::new(FlushCoordinator::new());
            let buffer = Arc::new(TelemetryBuffer::new(64, 64, Arc::clone(&coordinator)));
            Self::start_with(device, retry, buffer, coordinator)
        }

        fn start_with(
            device: MockStorage,
            retry: Option<Duration>,
            buffer: Arc<TelemetryBuffer>,
            coordinator: Arc<FlushCoordinator>,
        ) -> Self {
            let (reporter, output) = report::channel(false);
            let worker = PersistenceWorker::new(
                Arc::new(device.clone()),
                Arc::clone(&buffer),
                Arc::clone(&coordinator),
                reporter,
            )
            .with_retry_interval(retry);
            let phase = worker.subscribe();
            let stats = worker.stats();
            let task = tokio::spawn(worker.run());
            Self {
                buffer,
                coordinator,
                device,
                phase,
                stats,
                output,
                task,
            }
        }

        async fn wait_for(&mut self, target: PersistencePhase) {
            timeout(Duration::from_secs(2), self.phase.wait_for(|p| *p == target))
                .await
                .expect("phase not reached")
                .unwrap();
        }

        fn insert(&self, n: usize) {
            for i in 0..n {
                self.buffer
                    .insert(
                        Reading::new(i as f32, 1000.0, 1.0),
                        CalendarTimestamp::default(),
                    )
                    .unwrap();
            }
        }

        fn messages(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(m) = self.output.try_recv() {
                out.push(m);
            }
            out
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.task.abort();
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn flush_writes_drained_records() {
        let mut h = Harness::start(MockStorage::new(), None);
        h.wait_for(PersistencePhase::Writing).await;

        h.insert(3);
        h.coordinator.request_flush();
        settle().await;

        assert_eq!(h.device.blocks().len(), 1);
        assert_eq!(h.device.contents().lines().count(), 3);
        assert_eq!(h.buffer.occupied().unwrap(), 0);
        assert_eq!(h.stats.records_written(), 3);
    }

    #[tokio::test]
    async fn coalesced_flushes_cause_one_drain_cycle() {
        let coordinator = Arc::new(FlushCoordinator::new());
        let buffer = Arc::new(TelemetryBuffer::new(64, 64, Arc::clone(&coordinator)));
        coordinator.request_flush();
        coordinator.request_flush();

        let mut h = Harness::start_with(MockStorage::new(), None, buffer, coordinator);
        h.wait_for(PersistencePhase::Writing).await;
        settle().await;

        assert_eq!(h.stats.drain_cycles(), 1);
    }

    #[tokio::test]
    async fn eject_flushes_then_unmounts_and_parks() {
        let mut h = Harness::start(MockStorage::new(), None);
        h.wait_for(PersistencePhase::Writing).await;

        h.insert(2);
        h.coordinator.request_eject();
        h.wait_for(PersistencePhase::Parked).await;

        assert_eq!(h.device.contents().lines().count(), 2);
        assert!(!h.device.is_mounted());
        assert_eq!(h.device.unmounts(), 1);
        assert!(h.messages().contains(&"SD CARD: UNMOUNTED".to_string()));

        // Flushes while parked are held until the next mount.
        h.insert(1);
        h.coordinator.request_flush();
        settle().await;
        assert_eq!(h.device.blocks().len(), 1);

        h.coordinator.request_remount();
        h.wait_for(PersistencePhase::Writing).await;
        settle().await;
        assert_eq!(h.device.mounts(), 2);
        assert_eq!(h.device.blocks().len(), 2);
    }

    #[tokio::test]
    async fn mount_failure_waits_for_remount() {
        let device = MockStorage::new();
        device.set_fail_mount(true);
        let mut h = Harness::start(device, None);
        h.wait_for(PersistencePhase::Parked).await;
        assert!(h.messages().contains(&"[ERROR] SD mount failed.".to_string()));

        // No busy retry.
        settle().await;
        assert_eq!(h.stats.mount_failures(), 1);

        h.device.set_fail_mount(false);
        h.coordinator.request_remount();
        h.wait_for(PersistencePhase::Writing).await;
        assert_eq!(h.device.mounts(), 1);
    }

    #[tokio::test]
    async fn mount_failure_retries_after_backoff() {
        let device = MockStorage::new();
        device.set_fail_mount(true);
        let mut h = Harness::start(device, Some(Duration::from_millis(20)));
        h.wait_for(PersistencePhase::Parked).await;
        h.device.set_fail_mount(false);
        h.wait_for(PersistencePhase::Writing).await;
        assert!(h.stats.mount_failures() >= 1);
    }

    #[tokio::test]
    async fn open_failure_unmounts_and_parks() {
        let device = MockStorage::new();
        device.set_fail_open(true);
        let mut h = Harness::start(device, None);
        h.wait_for(PersistencePhase::Parked).await;
        assert!(!h.device.is_mounted());
        assert!(h
            .messages()
            .contains(&"[ERROR] File cannot be opened.".to_string()));
    }

    #[tokio::test]
    async fn failed_write_loses_block_but_keeps_running() {
        let mut h = Harness::start(MockStorage::new(), None);
        h.wait_for(PersistencePhase::Writing).await;

        h.device.set_fail_write(true);
        h.insert(4);
        h.coordinator.request_flush();
        settle().await;

        assert_eq!(h.stats.write_failures(), 1);
        assert_eq!(h.buffer.occupied().unwrap(), 0);
        assert!(h.messages().iter().any(|m| m.contains("4 records lost")));

        h.device.set_fail_write(false);
        h.insert(1);
        h.coordinator.request_flush();
        settle().await;
        assert_eq!(h.device.blocks().len(), 1);
        assert_eq!(*h.phase.borrow(), PersistencePhase::Writing);
    }

    #[tokio::test]
    async fn remount_request_while_writing_does_not_undo_eject() {
        let mut h = Harness::start(MockStorage::new(), None);
        h.wait_for(PersistencePhase::Writing).await;

        h.coordinator.request_remount();
        h.insert(1);
        h.coordinator.request_eject();
        h.wait_for(PersistencePhase::Parked).await;
        settle().await;

        assert_eq!(*h.phase.borrow(), PersistencePhase::Parked);
        assert!(!h.device.is_mounted());
        assert_eq!(h.device.mounts(), 1);
        assert_eq!(h.device.unmounts(), 1);

        h.coordinator.request_remount();
        h.wait_for(PersistencePhase::Writing).await;
        assert_eq!(h.device.mounts(), 2);
    }

    #[tokio::test]
    async fn eject_requested_while_mounting_is_served_after_mount() {
        let coordinator = Arc::new(FlushCoordinator::new());
        let buffer = Arc::new(TelemetryBuffer::new(64, 64, Arc::clone(&coordinator)));
        coordinator.request_eject();

        let mut h = Harness::start_with(MockStorage::new(), None, buffer, coordinator);
        h.wait_for(PersistencePhase::Parked).await;
        settle().await;

        assert_eq!(*h.phase.borrow(), PersistencePhase::Parked);
        assert!(!h.device.is_mounted());
        assert_eq!(h.device.mounts(), 1);
        assert_eq!(h.device.unmounts(), 1);
        assert!(h.messages().contains(&"SD CARD: UNMOUNTED".to_string()));
    }

    #[test]
    fn phase_maps_to_mount_state() {
        assert_eq!(PersistencePhase::Writing.mount_state(), MountState::Mounted);
        assert_eq!(PersistencePhase::Parked.mount_state(), MountState::Unmounted);
    }
}
