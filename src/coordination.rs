//! Cross-task signalling for the telemetry pipeline.
//!
//! Three small primitives carry all control flow between the sampler, the
//! persistence worker and the control plane:
//!
//! - [`FlushCoordinator`]: one-slot flush wake-up plus one-shot eject and
//!   re-mount requests, consumed by exactly one persistence worker.
//! - [`AdmissionGate`]: single-permit gate the sampler must pass on every
//!   iteration; the control plane closes it by holding the permit.
//! - [`SamplePeriod`]: runtime-adjustable sampling period, read fresh by the
//!   sampler each cycle.
//!
//! None of these share a lock with the telemetry buffer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{AcquireError, Notify, OwnedSemaphorePermit, Semaphore, SemaphorePermit};
use tracing::{debug, trace};

/// Wake-up signal between the buffer's producer side and the persistence worker.
///
/// At most one flush request is ever pending: releases while one is already
/// pending coalesce into it rather than queueing.
#[derive(Debug, Default)]
pub struct FlushCoordinator {
    flush_pending: AtomicBool,
    flush_notify: Notify,
    eject_requested: AtomicBool,
    remount_requested: AtomicBool,
    remount_notify: Notify,
}

impl FlushCoordinator {
    /// Create a coordinator with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the persistence worker to drain the buffer. Never blocks.
    pub fn request_flush(&self) {
        if !self.flush_pending.swap(true, Ordering::AcqRel) {
            trace!("Flush requested");
            self.flush_notify.notify_one();
        }
    }

    /// Ask for one final drain followed by an unmount.
    pub fn request_eject(&self) {
        self.eject_requested.store(true, Ordering::Release);
        self.request_flush();
    }

    /// Wake a persistence worker parked in the unmounted state.
    pub fn request_remount(&self) {
        self.remount_requested.store(true, Ordering::Release);
        self.remount_notify.notify_one();
    }

    /// Whether a flush request is waiting to be consumed.
    pub fn flush_pending(&self) -> bool {
        self.flush_pending.load(Ordering::Acquire)
    }

    /// Whether an eject request is waiting to be consumed.
    pub fn eject_pending(&self) -> bool {
        self.eject_requested.load(Ordering::Acquire)
    }

    /// Block until a flush request is pending, then consume it.
    pub async fn wait_for_flush(&self) {
        loop {
            if self.flush_pending.swap(false, Ordering::AcqRel) {
                return;
            }
            // A notify_one issued between the check and here leaves a permit,
            // so the wake-up is not lost.
            self.flush_notify.notified().await;
        }
    }

    /// Consume a pending eject request.
    pub fn take_eject(&self) -> bool {
        self.eject_requested.swap(false, Ordering::AcqRel)
    }

    /// Block until a re-mount request is pending, then consume it.
    pub async fn wait_for_remount(&self) {
        loop {
            if self.remount_requested.swap(false, Ordering::AcqRel) {
                return;
            }
            self.remount_notify.notified().await;
        }
    }

    /// Drop a re-mount request made while the card was mounted.
    ///
    /// The eject flag is left alone; only a write cycle consumes it.
    pub fn discard_remount(&self) {
        if self.remount_requested.swap(false, Ordering::AcqRel) {
            debug!("Discarded stale re-mount request");
        }
    }
}

/// Single-permit gate controlling whether sampling proceeds.
///
/// The sampler takes the permit for the duration of one sample. `close`
/// acquires and keeps the permit so the next iteration blocks before reading
/// sensors; `open` releases it again.
#[derive(Debug)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    held: Mutex<Option<OwnedSemaphorePermit>>,
}

impl AdmissionGate {
    /// Create a gate, initially open or closed.
    pub fn new(open: bool) -> Self {
        let permits = Arc::new(Semaphore::new(1));
        let held = if open {
            None
        } else {
            Arc::clone(&permits).try_acquire_owned().ok()
        };
        Self {
            permits,
            held: Mutex::new(held),
        }
    }

    /// Wait until sampling is admitted. Drop the permit when the sample is done.
    pub async fn admit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.permits.acquire().await
    }

    /// Stop admitting samples. Waits for an in-flight sample to finish.
    ///
    /// Returns `false` if the gate was already closed.
    pub async fn close(&self) -> bool {
        if self.held.lock().is_some() {
            return false;
        }
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => {
                *self.held.lock() = Some(permit);
                true
            }
            Err(_) => false,
        }
    }

    /// Resume admitting samples.
    ///
    /// Returns `false` if the gate was already open.
    pub fn open(&self) -> bool {
        self.held.lock().take().is_some()
    }

    /// Whether the sampler is currently admitted.
    pub fn is_open(&self) -> bool {
        self.held.lock().is_none()
    }
}

/// Sampling period shared between the control plane and the sampler.
#[derive(Debug)]
pub struct SamplePeriod {
    millis: AtomicU64,
}

impl SamplePeriod {
    /// Shortest accepted period.
    pub const MIN: Duration = Duration::from_millis(100);
    /// Longest accepted period.
    pub const MAX: Duration = Duration::from_secs(30);

    /// Create with an initial period.
    pub fn new(period: Duration) -> Self {
        Self {
            millis: AtomicU64::new(period.as_millis() as u64),
        }
    }

    /// Current period.
    pub fn get(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Acquire))
    }

    /// Whether `period` lies within the accepted range.
    pub fn in_range(period: Duration) -> bool {
        (Self::MIN..=Self::MAX).contains(&period)
    }

    /// Store a new period. Takes effect on the sampler's next cycle.
    pub fn set(&self, period: Duration) {
        self.millis
            .store(period.as_millis() as u64, Ordering::Release);
    }
}
