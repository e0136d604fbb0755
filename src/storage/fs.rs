//! Directory-backed storage device.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{LogFile, StorageDevice};
use crate::error::StorageError;

/// Storage device whose "card" is a directory on the host.
///
/// Mounting succeeds only while `mount_point` exists and is a directory, which
/// mirrors a card being present in the slot.
#[derive(Debug)]
pub struct FsStorage {
    mount_point: PathBuf,
    file_name: String,
    mounted: AtomicBool,
}

impl FsStorage {
    /// Device rooted at `mount_point`, writing to `file_name`.
    pub fn new(mount_point: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            mount_point: mount_point.into(),
            file_name: file_name.into(),
            mounted: AtomicBool::new(false),
        }
    }

    /// Full path of the log file.
    pub fn log_path(&self) -> PathBuf {
        self.mount_point.join(&self.file_name)
    }

    /// Directory standing in for the card.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Whether the device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }
}

#[async_trait]
impl StorageDevice for FsStorage {
    async fn mount(&self) -> Result<(), StorageError> {
        let metadata = tokio::fs::metadata(&self.mount_point)
            .await
            .map_err(|e| StorageError::Mount(format!("{}: {e}", self.mount_point.display())))?;
        if !metadata.is_dir() {
            return Err(StorageError::Mount(format!(
                "{} is not a directory",
                self.mount_point.display()
            )));
        }
        self.mounted.store(true, Ordering::Release);
        info!(mount_point = %self.mount_point.display(), "Storage mounted");
        Ok(())
    }

    async fn open_append(&self) -> Result<Box<dyn LogFile>, StorageError> {
        if !self.is_mounted() {
            return Err(StorageError::Open("device not mounted".to_string()));
        }
        let path = self.log_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::Open(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "Log file opened");
        Ok(Box::new(FsLogFile { file }))
    }

    async fn unmount(&self) -> Result<(), StorageError> {
        if !self.mounted.swap(false, Ordering::AcqRel) {
            return Err(StorageError::Unmount("device not mounted".to_string()));
        }
        info!(mount_point = %self.mount_point.display(), "Storage unmounted");
        Ok(())
    }

    fn describe(&self) -> String {
        self.log_path().display().to_string()
    }
}

struct FsLogFile {
    file: File,
}

#[async_trait]
impl LogFile for FsLogFile {
    async fn append(&mut self, text: &str) -> Result<(), StorageError> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(StorageError::Write)?;
        self.file.flush().await.map_err(StorageError::Write)
    }

    async fn close(mut self: Box<Self>) -> Result<(), StorageError> {
        self.file.flush().await.map_err(StorageError::Close)?;
        self.file.sync_all().await.map_err(StorageError::Close)
    }
}
