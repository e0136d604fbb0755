//! Custom error types for the logger.
//!
//! This module defines the error taxonomy for the telemetry pipeline. Using the
//! `thiserror` crate, each component gets a small, focused error enum, and
//! `LoggerError` consolidates them for callers that deal with the pipeline as a
//! whole (configuration loading, the CLI).
//!
//! ## Error Classes
//!
//! - **`BufferError`**: capacity errors (buffer full on insert) and
//!   synchronization errors (lock-acquisition timeout). Both are non-fatal: the
//!   sample is dropped or the call aborted, and the event is reported.
//! - **`StorageError`**: device errors (mount, open, write, close, unmount).
//!   Mount and open failures are retried on an explicit re-mount trigger.
//! - **`CommandError`**: input errors from the control plane (malformed or
//!   out-of-range arguments). No state is mutated when one is returned.
//! - **`TimestampError`**: invalid calendar fields written by the date editor
//!   or supplied in configuration.
//!
//! No error class is fatal. Every failure is resolved at the component
//! boundary where it occurs and surfaced as a reported event.

use thiserror::Error;

/// Convenience alias for results using the consolidated error type.
pub type AppResult<T> = std::result::Result<T, LoggerError>;

/// Errors raised by the bounded telemetry buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer holds `capacity` records; the new record was rejected.
    #[error("Buffer full ({capacity} records)")]
    Full {
        /// Fixed capacity of the buffer.
        capacity: usize,
    },

    /// The buffer lock could not be acquired within the configured timeout.
    #[error("Timed out after {timeout_ms}ms waiting for the buffer lock")]
    LockTimeout {
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
}

/// Errors raised by a storage device or an open log file.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The device could not be mounted.
    #[error("Mount failed: {0}")]
    Mount(String),

    /// The log file could not be opened for append.
    #[error("Cannot open log file: {0}")]
    Open(String),

    /// Appending a block failed.
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    /// Syncing or closing the log file failed.
    #[error("Close failed: {0}")]
    Close(#[source] std::io::Error),

    /// The device could not be unmounted.
    #[error("Unmount failed: {0}")]
    Unmount(String),
}

/// Input errors from the control plane.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The argument is not a number.
    #[error("{command} expects a numeric argument, got '{value}'")]
    InvalidNumber {
        /// Command token.
        command: String,
        /// Argument as received.
        value: String,
    },

    /// The numeric argument is outside the accepted range.
    #[error("{command} variable out of range.")]
    OutOfRange {
        /// Command token.
        command: String,
        /// Parsed argument.
        value: f64,
    },

    /// The argument is not one of the accepted keywords.
    #[error("{command} variable must be {expected}.")]
    InvalidSwitch {
        /// Command token.
        command: String,
        /// Human-readable list of accepted values.
        expected: &'static str,
    },

    /// The command needs an argument and got none.
    #[error("{command} requires an argument")]
    MissingArgument {
        /// Command token.
        command: String,
    },
}

/// Invalid calendar timestamp fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    /// Month outside 1-12.
    #[error("Month {0} is out of range 1-12")]
    Month(u8),

    /// Day outside the month's length.
    #[error("Day {day} is not valid for month {month}")]
    Day {
        /// Offending day.
        day: u8,
        /// Month it was checked against.
        month: u8,
    },

    /// Hour, minute or second out of range.
    #[error("Time {hour:02}:{minute:02}:{second:02} is out of range")]
    Time {
        /// Hour field.
        hour: u8,
        /// Minute field.
        minute: u8,
        /// Second field.
        second: u8,
    },

    /// Text not in `YYYY-MM-DD HH:MM:SS` form.
    #[error("Cannot parse timestamp '{0}', expected YYYY-MM-DD HH:MM:SS")]
    Parse(String),
}

/// Consolidated error type for the logger.
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Loading or merging configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure outside the storage device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// See [`BufferError`].
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    /// See [`StorageError`].
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// See [`CommandError`].
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// See [`TimestampError`].
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
}

impl From<figment::Error> for LoggerError {
    fn from(value: figment::Error) -> Self {
        LoggerError::Config(Box::new(value))
    }
}

impl BufferError {
    /// Message pushed to the transport when this error is reported.
    pub fn report_message(&self) -> String {
        match self {
            BufferError::Full { .. } => "Buffer full.".to_string(),
            BufferError::LockTimeout { .. } => self.to_string(),
        }
    }
}
