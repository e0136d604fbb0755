//! In-memory storage device with failure injection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{LogFile, StorageDevice};
use crate::error::StorageError;

#[derive(Debug, Default)]
struct MockState {
    mounted: bool,
    fail_mount: bool,
    fail_open: bool,
    fail_write: bool,
    mounts: usize,
    unmounts: usize,
    blocks: Vec<String>,
}

/// Storage device that records appended blocks in memory.
///
/// Cloning yields another handle to the same device, so a test can keep one
/// handle for inspection while the worker owns another.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    state: Arc<Mutex<MockState>>,
}

impl MockStorage {
    /// Empty, healthy device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `mount` fail.
    pub fn set_fail_mount(&self, fail: bool) {
        self.state.lock().fail_mount = fail;
    }

    /// Make `open_append` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Make `append` fail.
    pub fn set_fail_write(&self, fail: bool) {
        self.state.lock().fail_write = fail;
    }

    /// Whether the device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.state.lock().mounted
    }

    /// Successful mounts so far.
    pub fn mounts(&self) -> usize {
        self.state.lock().mounts
    }

    /// Unmounts so far.
    pub fn unmounts(&self) -> usize {
        self.state.lock().unmounts
    }

    /// Every block appended, in order.
    pub fn blocks(&self) -> Vec<String> {
        self.state.lock().blocks.clone()
    }

    /// All appended text concatenated.
    pub fn contents(&self) -> String {
        self.state.lock().blocks.concat()
    }
}

#[async_trait]
impl StorageDevice for MockStorage {
    async fn mount(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail_mount {
            return Err(StorageError::Mount("no card".to_string()));
        }
        state.mounted = true;
        state.mounts += 1;
        Ok(())
    }

    async fn open_append(&self) -> Result<Box<dyn LogFile>, StorageError> {
        let state = self.state.lock();
        if !state.mounted || state.fail_open {
            return Err(StorageError::Open("mock open refused".to_string()));
        }
        Ok(Box::new(MockLogFile {
            state: Arc::clone(&self.state),
        }))
    }

    async fn unmount(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.mounted = false;
        state.unmounts += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "mock storage".to_string()
    }
}

struct MockLogFile {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl LogFile for MockLogFile {
    async fn append(&mut self, text: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        if state.fail_write {
            return Err(StorageError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock write failure",
            )));
        }
        state.blocks.push(text.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
