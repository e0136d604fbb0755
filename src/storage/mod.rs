//! Removable storage abstraction.
//!
//! The persistence worker drives a [`StorageDevice`] through
//! mount → open (append) → write* → close → unmount. Two implementations ship
//! with the crate:
//!
//! - [`fs::FsStorage`]: a directory standing in for the card's mount point
//! - [`mock::MockStorage`]: in-memory device with failure injection for tests
//!
//! # Contract
//! - `mount` must fail cleanly when the medium is absent; the worker retries
//!   on a re-mount request or, if configured, after a retry interval
//! - `open_append` opens one file per mount session in append mode; the
//!   handle stays open until `LogFile::close` at unmount
//! - A failed `append` loses the block it was given; the worker does not retry

pub mod fs;
pub mod mock;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StorageError;

/// Whether the storage device is attached for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MountState {
    /// Not attached; writes are impossible.
    #[default]
    Unmounted,
    /// Attached with the log file open.
    Mounted,
}

/// Capability: a mountable storage device.
#[async_trait]
pub trait StorageDevice: Send + Sync {
    /// Attach the device.
    async fn mount(&self) -> Result<(), StorageError>;

    /// Open the session's log file in append mode.
    async fn open_append(&self) -> Result<Box<dyn LogFile>, StorageError>;

    /// Detach the device.
    async fn unmount(&self) -> Result<(), StorageError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// An open, append-only log file.
#[async_trait]
pub trait LogFile: Send {
    /// Append `text` verbatim.
    async fn append(&mut self, text: &str) -> Result<(), StorageError>;

    /// Flush and close the file.
    async fn close(self: Box<Self>) -> Result<(), StorageError>;
}
