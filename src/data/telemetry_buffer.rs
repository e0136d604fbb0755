//! Bounded FIFO buffer for sample records.
//!
//! The buffer sits between the sampler (sole producer) and the persistence
//! worker (drains on every flush). All mutation happens inside short critical
//! sections guarded by a `parking_lot::Mutex`:
//!
//! - `insert` appends one record or rejects it when the buffer is full. It
//!   never blocks waiting for space and never overwrites unflushed data.
//! - `drain` copies every occupied record and, when `clear` is set, resets
//!   occupancy in the same critical section. Formatting happens after the lock
//!   is released so producers are not stalled by string building.
//!
//! # Memory Layout
//! ```text
//! records: Vec<SampleRecord> with capacity N, allocated once
//! [ r0 r1 r2 ... r(len-1) | free space (N - len) ]
//!   oldest ------> newest
//! ```
//!
//! Clearing resets `len` only; the backing allocation lives for the whole
//! process.
//!
//! Lock acquisition is bounded by a timeout. A caller that cannot get the lock
//! in time receives [`BufferError::LockTimeout`] instead of wedging the
//! pipeline.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use super::clock::CalendarTimestamp;
use super::record::{Reading, Rendered, SampleRecord};
use crate::coordination::FlushCoordinator;
use crate::error::BufferError;

/// Consume threshold for a given sampling period.
///
/// The threshold is the number of samples taken in one `window`, so the buffer
/// auto-flushes roughly once per window whatever the period. Clamped to
/// `1..=capacity`.
pub fn consume_threshold(window: Duration, period: Duration, capacity: usize) -> usize {
    let period_secs = period.as_secs_f64();
    if period_secs <= 0.0 {
        return capacity.max(1);
    }
    let samples = (window.as_secs_f64() / period_secs).round();
    (samples as usize).clamp(1, capacity.max(1))
}

/// Fixed-capacity, mutex-protected store of sample records.
#[derive(Debug)]
pub struct TelemetryBuffer {
    records: Mutex<Vec<SampleRecord>>,
    capacity: usize,
    threshold: AtomicUsize,
    lock_timeout: Duration,
    coordinator: Arc<FlushCoordinator>,
}

impl TelemetryBuffer {
    /// Default time allowed for acquiring the buffer lock.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(250);

    /// Create a buffer holding at most `capacity` records.
    ///
    /// `threshold` is clamped to `1..=capacity`.
    pub fn new(capacity: usize, threshold: usize, coordinator: Arc<FlushCoordinator>) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, threshold, "Telemetry buffer created");
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            threshold: AtomicUsize::new(threshold.clamp(1, capacity)),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            coordinator,
        }
    }

    /// Override the lock-acquisition timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<SampleRecord>>, BufferError> {
        self.records
            .try_lock_for(self.lock_timeout)
            .ok_or(BufferError::LockTimeout {
                timeout_ms: self.lock_timeout.as_millis() as u64,
            })
    }

    /// Append a record stamped with `timestamp`.
    ///
    /// Fails with [`BufferError::Full`] when no space is left; the record is
    /// dropped. Signals the flush coordinator once occupancy reaches the
    /// consume threshold.
    pub fn insert(
        &self,
        reading: Reading,
        timestamp: CalendarTimestamp,
    ) -> Result<(), BufferError> {
        let occupied = {
            let mut records = self.lock()?;
            if records.len() >= self.capacity {
                return Err(BufferError::Full {
                    capacity: self.capacity,
                });
            }
            records.push(SampleRecord::new(reading, timestamp));
            records.len()
        };

        trace!(occupied, free = self.capacity - occupied, "Record inserted");
        if occupied >= self.threshold() {
            self.coordinator.request_flush();
        }
        Ok(())
    }

    /// Render records `[start, end)` of a snapshot of the buffer.
    ///
    /// `end = None`, or any value past the last occupied record, means "through
    /// the last record". With `clear`, the buffer is emptied in the same
    /// critical section that takes the snapshot. Returns
    /// [`Rendered::NoRecords`] if the buffer held nothing.
    pub fn drain(
        &self,
        start: usize,
        end: Option<usize>,
        clear: bool,
    ) -> Result<Rendered, BufferError> {
        let snapshot = {
            let mut records = self.lock()?;
            let snapshot = records.clone();
            if clear {
                records.clear();
            }
            snapshot
        };

        if snapshot.is_empty() {
            return Ok(Rendered::NoRecords);
        }
        if clear {
            debug!(records = snapshot.len(), "Buffer drained");
        }

        let end = end.map_or(snapshot.len(), |end| end.min(snapshot.len()));
        let start = start.min(end);
        Ok(Rendered::from_records(&snapshot[start..end]))
    }

    /// Render the most recent record without changing the buffer.
    pub fn peek_last(&self) -> Result<Rendered, BufferError> {
        match self.last_record()? {
            Some(record) => Ok(Rendered::from_records(&[record])),
            None => Ok(Rendered::NoRecords),
        }
    }

    /// Copy of the most recent record, if any.
    pub fn last_record(&self) -> Result<Option<SampleRecord>, BufferError> {
        Ok(self.lock()?.last().copied())
    }

    /// Copy of every occupied record, oldest first.
    pub fn snapshot(&self) -> Result<Vec<SampleRecord>, BufferError> {
        Ok(self.lock()?.clone())
    }

    /// Update the consume threshold used by the next `insert`.
    pub fn set_threshold(&self, threshold: usize) {
        let threshold = threshold.clamp(1, self.capacity);
        self.threshold.store(threshold, Ordering::Release);
        debug!(threshold, "Consume threshold updated");
    }

    /// Occupancy at which an insert requests a flush.
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Acquire)
    }

    /// Maximum number of records held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of occupied records.
    pub fn occupied(&self) -> Result<usize, BufferError> {
        Ok(self.lock()?.len())
    }

    /// Number of free slots. Always `capacity - occupied`.
    pub fn free_space(&self) -> Result<usize, BufferError> {
        Ok(self.capacity - self.lock()?.len())
    }
}
